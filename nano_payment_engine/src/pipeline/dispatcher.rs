use log::*;
use tokio::sync::mpsc;

use crate::{
    node::{WalletError, WalletFactory},
    notifier::{NotifierError, NotifierRegistry},
    pipeline::{
        messages::{MessageBody, PipelineMessage, PipelineSender, QueueName},
        pubsub::PubSubChannel,
        stages,
        webhook::WebhookDeliverer,
    },
    settlement::{SettlementError, SettlementHandle},
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The expected-termination sentinel: the invoice's deadline passed. Logged informational, never retried.
    #[error("Payment deadline reached")]
    PaymentTimeout,
    #[error("Message is missing required field '{0}'")]
    MissingField(&'static str),
    #[error(transparent)]
    Database(#[from] PaymentGatewayError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Notifier(#[from] NotifierError),
    #[error("Settlement worker error: {0}")]
    Settlement(SettlementError),
    #[error("Webhook delivery failed: {0}")]
    WebhookDelivery(String),
    #[error("The pipeline queue is closed")]
    QueueClosed,
}

impl From<SettlementError> for PipelineError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::DeadlinePassed => PipelineError::PaymentTimeout,
            other => PipelineError::Settlement(other),
        }
    }
}

/// Routes one message at a time to the stage matching its queue name.
pub struct Dispatcher<B, P> {
    db: B,
    sender: PipelineSender,
    settlement: SettlementHandle,
    notifiers: NotifierRegistry<B>,
    wallets: WalletFactory,
    webhooks: WebhookDeliverer,
    pubsub: P,
}

impl<B, P> Dispatcher<B, P>
where
    B: PaymentGatewayDatabase,
    P: PubSubChannel,
{
    pub fn new(
        db: B,
        sender: PipelineSender,
        settlement: SettlementHandle,
        notifiers: NotifierRegistry<B>,
        wallets: WalletFactory,
        webhooks: WebhookDeliverer,
        pubsub: P,
    ) -> Self {
        Self { db, sender, settlement, notifiers, wallets, webhooks, pubsub }
    }

    /// Process a batch. Exactly one message per batch is supported: anything else is a dispatcher-level error and
    /// the batch is dropped with a log rather than processed partially.
    pub async fn dispatch(&self, batch: Vec<PipelineMessage>) -> Result<(), PipelineError> {
        if batch.len() != 1 {
            error!("🚦️ Cannot process a batch of {} messages; batches must contain exactly one", batch.len());
            return Ok(());
        }
        let Some(message) = batch.into_iter().next() else {
            return Ok(());
        };
        trace!("🚦️ Dispatching message for invoice {} on {}", message.body.invoice.id, message.queue);
        match message.queue {
            QueueName::PaymentListener => self.listen(message.body).await,
            QueueName::PaymentWrite => stages::payment_write(&self.db, &self.sender, message.body).await,
            QueueName::PaymentPusher => stages::payment_push(&self.notifiers, &self.pubsub, message.body).await,
            QueueName::WebhookDelivery => {
                stages::webhook_delivery(&self.webhooks, &self.sender, message.body).await
            },
            QueueName::WebhookDeliveryWrite => stages::webhook_delivery_write(&self.db, message.body).await,
            QueueName::PaymentReceiver => {
                stages::payment_receive(&self.db, &self.wallets, &self.sender, message.body).await
            },
            QueueName::PaymentSender => stages::payment_send(&self.db, &self.wallets, message.body).await,
            QueueName::Unknown(name) => {
                debug!("🚦️ Ignoring message for unknown queue '{name}'");
                Ok(())
            },
        }
    }

    async fn listen(&self, body: MessageBody) -> Result<(), PipelineError> {
        let webhooks = body.webhooks.ok_or(PipelineError::MissingField("webhooks"))?;
        self.settlement.listen(body.invoice, body.service, webhooks).await.map_err(PipelineError::from)
    }
}

/// Drain the pipeline channel, dispatching each message and redelivering failures. The timeout sentinel is
/// swallowed after an informational log; any other error is retried up to `max_attempts` with a short linear
/// backoff, then dead-lettered with an error log so the at-least-once contract is visible in the logs when it
/// finally gives up.
pub async fn run_pipeline<B, P>(
    dispatcher: Dispatcher<B, P>,
    mut rx: mpsc::Receiver<PipelineMessage>,
    max_attempts: u32,
) where
    B: PaymentGatewayDatabase,
    P: PubSubChannel,
{
    info!("🚦️ Pipeline dispatcher started");
    while let Some(message) = rx.recv().await {
        let queue = message.queue.clone();
        let invoice_id = message.body.invoice.id.clone();
        let mut attempt = 1u32;
        loop {
            match dispatcher.dispatch(vec![message.clone()]).await {
                Ok(()) => break,
                Err(PipelineError::PaymentTimeout) => {
                    info!("🚦️ Payment timeout for invoice {invoice_id}");
                    break;
                },
                Err(e) if attempt < max_attempts => {
                    warn!("🚦️ {queue} stage failed for invoice {invoice_id} (attempt {attempt}/{max_attempts}): {e}. Redelivering.");
                    tokio::time::sleep(std::time::Duration::from_millis(250 * u64::from(attempt))).await;
                    attempt += 1;
                },
                Err(e) => {
                    error!("🚦️ {queue} stage failed for invoice {invoice_id} after {max_attempts} attempts, dropping message: {e}");
                    break;
                },
            }
        }
    }
    info!("🚦️ Pipeline dispatcher stopped");
}
