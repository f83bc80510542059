//! Queue names and the pipeline wire contract.
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    db_types::{Invoice, Payment, Service, Webhook, WebhookDelivery},
    pipeline::dispatcher::PipelineError,
};

//--------------------------------------      QueueName       --------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueName {
    PaymentListener,
    PaymentWrite,
    PaymentPusher,
    WebhookDelivery,
    WebhookDeliveryWrite,
    PaymentReceiver,
    PaymentSender,
    /// An unrecognized queue. Messages routed here are dropped with a log; this keeps a renamed or stale producer
    /// from wedging the pipeline.
    Unknown(String),
}

impl QueueName {
    pub fn as_str(&self) -> &str {
        match self {
            QueueName::PaymentListener => "payment-listener-queue",
            QueueName::PaymentWrite => "payment-write-queue",
            QueueName::PaymentPusher => "payment-pusher-queue",
            QueueName::WebhookDelivery => "webhook-delivery-queue",
            QueueName::WebhookDeliveryWrite => "webhook-delivery-write-queue",
            QueueName::PaymentReceiver => "payment-receiver-queue",
            QueueName::PaymentSender => "payment-sender-queue",
            QueueName::Unknown(name) => name.as_str(),
        }
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let queue = match s {
            "payment-listener-queue" => Self::PaymentListener,
            "payment-write-queue" => Self::PaymentWrite,
            "payment-pusher-queue" => Self::PaymentPusher,
            "webhook-delivery-queue" => Self::WebhookDelivery,
            "webhook-delivery-write-queue" => Self::WebhookDeliveryWrite,
            "payment-receiver-queue" => Self::PaymentReceiver,
            "payment-sender-queue" => Self::PaymentSender,
            other => Self::Unknown(other.to_string()),
        };
        Ok(queue)
    }
}

//--------------------------------------     MessageBody      --------------------------------------------------------

/// The pipeline's wire contract. Field presence is stage-dependent; each stage validates the fields it requires and
/// treats a missing one as a fatal error for that stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub invoice: Invoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhooks: Option<Vec<Webhook>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payments: Option<Vec<Payment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<Webhook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_delivery: Option<WebhookDelivery>,
}

impl MessageBody {
    fn bare(invoice: Invoice) -> Self {
        Self {
            invoice,
            service: None,
            webhooks: None,
            payment: None,
            payments: None,
            webhook: None,
            webhook_type: None,
            webhook_delivery: None,
        }
    }

    pub fn listen(invoice: Invoice, service: Option<Service>, webhooks: Vec<Webhook>) -> Self {
        Self { service, webhooks: Some(webhooks), ..Self::bare(invoice) }
    }

    pub fn write(invoice: Invoice, payment: Payment, service: Option<Service>, webhooks: Vec<Webhook>) -> Self {
        Self { service, webhooks: Some(webhooks), payment: Some(payment), ..Self::bare(invoice) }
    }

    pub fn push(invoice: Invoice, payments: Vec<Payment>) -> Self {
        Self { payments: Some(payments), ..Self::bare(invoice) }
    }

    pub fn webhook_delivery(
        invoice: Invoice,
        payment: Payment,
        service: Option<Service>,
        webhook: Webhook,
        webhook_type: String,
    ) -> Self {
        Self {
            service,
            payment: Some(payment),
            webhook: Some(webhook),
            webhook_type: Some(webhook_type),
            ..Self::bare(invoice)
        }
    }

    pub fn webhook_delivery_write(invoice: Invoice, delivery: WebhookDelivery) -> Self {
        Self { webhook_delivery: Some(delivery), ..Self::bare(invoice) }
    }

    pub fn receive(invoice: Invoice, payments: Vec<Payment>) -> Self {
        Self { payments: Some(payments), ..Self::bare(invoice) }
    }

    pub fn send(invoice: Invoice) -> Self {
        Self::bare(invoice)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub queue: QueueName,
    pub body: MessageBody,
}

//--------------------------------------    PipelineSender    --------------------------------------------------------

/// A cloneable producer handle onto the pipeline channel.
#[derive(Clone)]
pub struct PipelineSender {
    tx: mpsc::Sender<PipelineMessage>,
}

impl PipelineSender {
    /// Create the pipeline channel. The receiver goes to [`crate::pipeline::run_pipeline`].
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<PipelineMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn send(&self, queue: QueueName, body: MessageBody) -> Result<(), PipelineError> {
        self.tx
            .send(PipelineMessage { queue, body })
            .await
            .map_err(|_| PipelineError::QueueClosed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queue_names_round_trip() {
        let queues = [
            QueueName::PaymentListener,
            QueueName::PaymentWrite,
            QueueName::PaymentPusher,
            QueueName::WebhookDelivery,
            QueueName::WebhookDeliveryWrite,
            QueueName::PaymentReceiver,
            QueueName::PaymentSender,
        ];
        for queue in queues {
            let parsed: QueueName = queue.as_str().parse().unwrap();
            assert_eq!(parsed, queue);
        }
        let unknown: QueueName = "mystery-queue".parse().unwrap();
        assert_eq!(unknown, QueueName::Unknown("mystery-queue".into()));
    }
}
