use std::time::Duration;

/// Difficulty threshold for send-class blocks (send, change).
pub const SEND_DIFFICULTY: u64 = 0xfffffff8_00000000;
/// Difficulty threshold for receive-class blocks. Roughly 64x cheaper than send work.
pub const RECEIVE_DIFFICULTY: u64 = 0xfffffe00_00000000;

/// Heartbeat cadence on the confirmation websocket.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Hard timeout applied to every RPC and work-generation call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the websocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
