//! Clients for the nano node: the websocket confirmation stream, the JSON-RPC/work endpoint pools, and the
//! account-chain wallet built on top of them.
pub mod constants;
mod rpc;
mod wallet;
mod websocket;
mod work;

pub use rpc::{NodeClientError, NodeRpcClient};
pub use wallet::{NanoWallet, StateBlock, WalletError, WalletFactory};
pub use websocket::{CloseEvent, NanoWebsocket, NodeEventStreams, SendEvent, WebsocketError};
pub use work::{validate_work, BlockClass, WorkError, WorkThreshold};
