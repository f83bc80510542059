//! The staged message pipeline.
//!
//! Every state transition travels as a [`PipelineMessage`] on a named queue. The [`Dispatcher`] routes one message
//! at a time to its stage; the pump redelivers failed messages (at-least-once), so every stage either completes its
//! side effects fully or fails before anything externally visible happens. The single deliberate exception is the
//! payment-deadline timeout, which is an expected outcome and is logged instead of retried.
mod dispatcher;
mod messages;
mod pubsub;
mod stages;
mod webhook;

pub use dispatcher::{run_pipeline, Dispatcher, PipelineError};
pub use messages::{MessageBody, PipelineMessage, PipelineSender, QueueName};
pub use pubsub::{LogPubSub, PubSubChannel};
pub use webhook::{sign_payload, WebhookDeliverer};

/// The webhook event emitted when payments land on an invoice.
pub const WEBHOOK_EVENT_INVOICE_PAID: &str = "invoice.paid";
