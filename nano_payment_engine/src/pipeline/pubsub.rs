//! The boundary to the third-party pub/sub channel.
//!
//! Actual delivery (Pusher or similar) lives outside the engine; the pipeline only needs somewhere to hand the
//! cumulative payment snapshot. The default implementation logs the event, which is also what tests assert against.
use log::*;

#[allow(async_fn_in_trait)]
pub trait PubSubChannel: Clone + Send + Sync + 'static {
    /// Publish `payload` as `event_name` on the invoice's channel. Best-effort: implementations must not let a
    /// delivery failure propagate into the settlement flow.
    async fn publish(&self, channel: &str, event_name: &str, payload: serde_json::Value);
}

#[derive(Debug, Clone, Default)]
pub struct LogPubSub;

impl PubSubChannel for LogPubSub {
    async fn publish(&self, channel: &str, event_name: &str, payload: serde_json::Value) {
        info!("📨️ [{channel}] {event_name}: {payload}");
    }
}
