//! The confirmation-stream client: one long-lived websocket subscription to the node, carrying every watched
//! account.
//!
//! The node pushes a `confirmation` frame for every confirmed block touching a subscribed account; only
//! `subtype == "send"` frames become [`SendEvent`]s. Watched accounts are added and removed incrementally with
//! `update` frames so a busy gateway does not resubscribe its whole account list on every new invoice.
//!
//! Closes initiated through [`NanoWebsocket::close`] are tagged, so the consumer can tell a planned shutdown from a
//! network drop. A drop is fatal and must be surfaced, not quietly reconnected over.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use log::*;
use npg_common::RawAmount;
use serde::Deserialize;
use serde_json::json;
use tokio::{net::TcpStream, sync::mpsc, sync::Mutex, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::{
    db_types::{BlockHash, NanoAddress},
    node::constants::{CONNECT_TIMEOUT, KEEP_ALIVE_INTERVAL},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

#[derive(Debug, thiserror::Error)]
pub enum WebsocketError {
    #[error("Invalid websocket URL '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("The websocket is not connected")]
    NotConnected,
    #[error("Websocket handshake with {0} failed: {1}")]
    HandshakeFailed(String, String),
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("Failed to send a control frame: {0}")]
    SendFailed(String),
}

/// A normalized incoming transfer observed on the confirmation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEvent {
    pub from: NanoAddress,
    pub to: NanoAddress,
    /// The transferred amount in raw.
    pub amount: RawAmount,
    pub hash: BlockHash,
    /// Confirmation time reported by the node, in milliseconds since the epoch.
    pub timestamp: i64,
}

/// Emitted once when the underlying stream ends, for whatever reason.
#[derive(Debug, Clone)]
pub struct CloseEvent {
    /// True when the close was requested through [`NanoWebsocket::close`].
    pub deliberate: bool,
    pub reason: String,
}

/// The receiving ends of the client's event channels. Created once; they survive reconnects.
pub struct NodeEventStreams {
    pub payments: mpsc::UnboundedReceiver<SendEvent>,
    pub closes: mpsc::UnboundedReceiver<CloseEvent>,
}

pub struct NanoWebsocket {
    url: Url,
    writer: Option<Arc<Mutex<WsWriter>>>,
    listening_accounts: Vec<NanoAddress>,
    closed_by_client: Arc<AtomicBool>,
    payment_tx: mpsc::UnboundedSender<SendEvent>,
    close_tx: mpsc::UnboundedSender<CloseEvent>,
}

impl NanoWebsocket {
    /// Create a disconnected client. `ws://` and `wss://` URLs are accepted, as are their http(s) equivalents,
    /// which some node configurations advertise.
    pub fn new(url: &str) -> Result<(Self, NodeEventStreams), WebsocketError> {
        let normalized = url.trim().replacen("http://", "ws://", 1).replacen("https://", "wss://", 1);
        let parsed =
            Url::parse(&normalized).map_err(|e| WebsocketError::InvalidUrl(url.to_string(), e.to_string()))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(WebsocketError::InvalidUrl(url.to_string(), "scheme must be ws or wss".into()));
        }
        let (payment_tx, payment_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let client = Self {
            url: parsed,
            writer: None,
            listening_accounts: Vec::new(),
            closed_by_client: Arc::new(AtomicBool::new(false)),
            payment_tx,
            close_tx,
        };
        Ok((client, NodeEventStreams { payments: payment_rx, closes: close_rx }))
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn watched_account_count(&self) -> usize {
        self.listening_accounts.len()
    }

    /// Establish the connection. Idempotent: a second call while connected does nothing.
    pub async fn connect(&mut self) -> Result<(), WebsocketError> {
        if self.writer.is_some() {
            return Ok(());
        }
        self.closed_by_client.store(false, Ordering::SeqCst);
        let connected = timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| WebsocketError::ConnectTimeout(self.url.to_string()))?
            .map_err(|e| WebsocketError::HandshakeFailed(self.url.to_string(), e.to_string()))?;
        let (stream, _response) = connected;
        let (writer, reader) = stream.split();
        let writer = Arc::new(Mutex::new(writer));
        self.writer = Some(Arc::clone(&writer));
        self.spawn_reader(reader);
        self.spawn_keep_alive(writer);
        info!("🔌️ Connected to node websocket at {}", self.url);
        Ok(())
    }

    fn spawn_reader(&self, mut reader: futures_util::stream::SplitStream<WsStream>) {
        let payment_tx = self.payment_tx.clone();
        let close_tx = self.close_tx.clone();
        let closed_by_client = Arc::clone(&self.closed_by_client);
        tokio::spawn(async move {
            let mut reason = String::new();
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_send_event(&text) {
                            trace!("🔌️ send event {} → {} ({})", event.from, event.to, event.hash);
                            let _ = payment_tx.send(event);
                        }
                    },
                    Ok(Message::Close(close_frame)) => {
                        reason = close_frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        reason = e.to_string();
                        break;
                    },
                }
            }
            let deliberate = closed_by_client.load(Ordering::SeqCst);
            debug!("🔌️ Websocket reader finished (deliberate: {deliberate}, reason: '{reason}')");
            let _ = close_tx.send(CloseEvent { deliberate, reason });
        });
    }

    fn spawn_keep_alive(&self, writer: Arc<Mutex<WsWriter>>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let frame = json!({ "ping": "pong" }).to_string();
                if writer.lock().await.send(Message::Text(frame)).await.is_err() {
                    // The connection is gone; the reader task reports the close.
                    debug!("🔌️ Keep-alive failed to send, stopping heartbeat");
                    break;
                }
            }
        });
    }

    /// Start watching an account. The first account sends a full `subscribe` frame; later ones are added
    /// incrementally. Watching an already-watched account is a no-op.
    pub async fn subscribe(&mut self, account: &NanoAddress) -> Result<(), WebsocketError> {
        if self.listening_accounts.contains(account) {
            return Ok(());
        }
        let frame = if self.listening_accounts.is_empty() {
            json!({
                "action": "subscribe",
                "topic": "confirmation",
                "options": { "accounts": [account] },
            })
        } else {
            json!({
                "action": "update",
                "topic": "confirmation",
                "options": { "accounts_add": [account] },
            })
        };
        self.send_control(frame).await?;
        self.listening_accounts.push(account.clone());
        debug!("🔌️ Watching {} accounts", self.listening_accounts.len());
        Ok(())
    }

    /// Stop watching an account. The last account sends a full `unsubscribe`; otherwise the account is removed
    /// incrementally. Unwatched accounts are a no-op.
    pub async fn unsubscribe(&mut self, account: &NanoAddress) -> Result<(), WebsocketError> {
        if !self.listening_accounts.contains(account) {
            return Ok(());
        }
        let frame = if self.listening_accounts.len() > 1 {
            json!({
                "action": "update",
                "topic": "confirmation",
                "options": { "accounts_del": [account] },
            })
        } else {
            json!({
                "action": "unsubscribe",
                "topic": "confirmation",
            })
        };
        self.send_control(frame).await?;
        self.listening_accounts.retain(|a| a != account);
        debug!("🔌️ Watching {} accounts", self.listening_accounts.len());
        Ok(())
    }

    async fn send_control(&self, frame: serde_json::Value) -> Result<(), WebsocketError> {
        let writer = self.writer.as_ref().ok_or(WebsocketError::NotConnected)?;
        writer
            .lock()
            .await
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| WebsocketError::SendFailed(e.to_string()))
    }

    /// Deliberately close the connection. The resulting [`CloseEvent`] will carry `deliberate: true`.
    pub async fn close(&mut self) {
        self.closed_by_client.store(true, Ordering::SeqCst);
        if let Some(writer) = self.writer.take() {
            let _ = writer.lock().await.send(Message::Close(None)).await;
        }
        self.listening_accounts.clear();
        info!("🔌️ Websocket closed by client");
    }

    /// Forget the connection and watched accounts after an unexpected close. The next `connect` starts fresh.
    pub fn reset(&mut self) {
        self.writer = None;
        self.listening_accounts.clear();
    }
}

//--------------------------------------   frame parsing      --------------------------------------------------------

#[derive(Deserialize)]
struct ConfirmationFrame {
    time: Option<String>,
    message: Option<ConfirmationMessage>,
}

#[derive(Deserialize)]
struct ConfirmationMessage {
    amount: Option<String>,
    hash: Option<String>,
    block: Option<ConfirmationBlock>,
}

#[derive(Deserialize)]
struct ConfirmationBlock {
    subtype: Option<String>,
    account: Option<String>,
    link_as_account: Option<String>,
}

fn parse_send_event(text: &str) -> Option<SendEvent> {
    let frame: ConfirmationFrame = serde_json::from_str(text).ok()?;
    let message = frame.message?;
    let block = message.block?;
    if block.subtype.as_deref() != Some("send") {
        return None;
    }
    let amount = match message.amount.as_deref()?.parse::<RawAmount>() {
        Ok(amount) => amount,
        Err(e) => {
            warn!("🔌️ Discarding confirmation frame with unparseable amount: {e}");
            return None;
        },
    };
    Some(SendEvent {
        from: NanoAddress::from(block.account?),
        to: NanoAddress::from(block.link_as_account?),
        amount,
        hash: BlockHash::from(message.hash?),
        timestamp: frame.time.and_then(|t| t.parse::<i64>().ok()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const SEND_FRAME: &str = r#"{
        "topic": "confirmation",
        "time": "1718900000000",
        "message": {
            "account": "nano_1sender",
            "amount": "2000000000000000000000000000000",
            "hash": "ABC123",
            "block": {
                "type": "state",
                "subtype": "send",
                "account": "nano_1sender",
                "link_as_account": "nano_1receiver"
            }
        }
    }"#;

    #[test]
    fn send_frames_are_normalized() {
        let event = parse_send_event(SEND_FRAME).unwrap();
        assert_eq!(event.from, NanoAddress::from("nano_1sender"));
        assert_eq!(event.to, NanoAddress::from("nano_1receiver"));
        assert_eq!(event.amount, "2000000000000000000000000000000".parse().unwrap());
        assert_eq!(event.hash, BlockHash::from("ABC123"));
        assert_eq!(event.timestamp, 1_718_900_000_000);
    }

    #[test]
    fn non_send_frames_are_ignored() {
        let receive = SEND_FRAME.replace("\"send\"", "\"receive\"");
        assert!(parse_send_event(&receive).is_none());
        assert!(parse_send_event(r#"{"ack": "subscribe"}"#).is_none());
        assert!(parse_send_event("not json").is_none());
    }

    #[test]
    fn invalid_amounts_are_dropped() {
        let garbled = SEND_FRAME.replace("2000000000000000000000000000000", "many");
        assert!(parse_send_event(&garbled).is_none());
    }

    #[test]
    fn url_schemes_are_normalized() {
        assert!(NanoWebsocket::new("wss://node.example.com").is_ok());
        assert!(NanoWebsocket::new("https://node.example.com").is_ok());
        assert!(NanoWebsocket::new("ftp://node.example.com").is_err());
    }
}
