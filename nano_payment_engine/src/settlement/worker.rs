//! The invoice settlement worker: one long-lived actor owning the node subscription and every open invoice's
//! payment state.
//!
//! The actor races three inputs in a single `select!` loop (listen commands, incoming transfer events, and a
//! reaper timer armed at `min(ceiling, nearest deadline)`), so events for one invoice are handled strictly
//! sequentially and the cumulative-total and payment-cap checks are race-free by construction. Each invoice's
//! lifecycle is `AwaitingPayment → Paid` (terminal), `→ Expired` (terminal, via the reaper) or
//! `→ PaymentCapExceeded` (terminal, fraud/DoS guard); the worker is the only component that writes those status
//! transitions.
//!
//! A deliberate close of the node stream (last invoice settled) is routine. An unexpected close is fatal for every
//! invoice currently listening: the worker logs it at error level, drops its pending entries and surfaces the
//! condition to its supervisor rather than quietly reconnecting with possibly-missed events.

use chrono::{DateTime, Utc};
use log::*;
use npg_common::NanoAmount;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    db_types::{Invoice, InvoiceStatus, NanoAddress, Payment, Service, Webhook},
    events::{EventProducers, InvoiceExpiredEvent, InvoicePaidEvent, PaymentReceivedEvent},
    node::{NanoWebsocket, NodeEventStreams, SendEvent, WebsocketError},
    notifier::{NotifierError, NotifierRegistry, StopReason},
    pipeline::{MessageBody, PipelineSender, QueueName},
    traits::{PaymentGatewayDatabase, PaymentGatewayError},
};

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Invoice has no pay address")]
    MissingPayAddress,
    #[error("The payment deadline has already passed")]
    DeadlinePassed,
    #[error("The settlement worker has stopped")]
    WorkerStopped,
    #[error(transparent)]
    Websocket(#[from] WebsocketError),
    #[error(transparent)]
    Database(#[from] PaymentGatewayError),
    #[error(transparent)]
    Notifier(#[from] NotifierError),
    #[error("Could not enqueue pipeline message: {0}")]
    Pipeline(String),
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Transfers below this amount are dust: logged and ignored, never recorded.
    pub min_amount: NanoAmount,
    /// Terminal cap on accepted payments per invoice.
    pub max_payments_per_invoice: usize,
    /// Upper bound on how long the reaper sleeps between passes.
    pub reaper_ceiling: std::time::Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            // 0.00001 XNO
            min_amount: NanoAmount::from_micro(10),
            max_payments_per_invoice: 10,
            reaper_ceiling: std::time::Duration::from_secs(30),
        }
    }
}

enum Command {
    Listen {
        invoice: Invoice,
        service: Option<Service>,
        webhooks: Vec<Webhook>,
        reply: oneshot::Sender<Result<(), SettlementError>>,
    },
}

/// The client half of the worker: lets the listen stage hand an invoice over and await confirmation that the
/// subscription is live.
#[derive(Clone)]
pub struct SettlementHandle {
    tx: mpsc::Sender<Command>,
}

impl SettlementHandle {
    pub async fn listen(
        &self,
        invoice: Invoice,
        service: Option<Service>,
        webhooks: Vec<Webhook>,
    ) -> Result<(), SettlementError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Listen { invoice, service, webhooks, reply })
            .await
            .map_err(|_| SettlementError::WorkerStopped)?;
        response.await.map_err(|_| SettlementError::WorkerStopped)?
    }
}

/// One invoice's in-memory listening state.
struct PendingInvoice {
    invoice: Invoice,
    service: Option<Service>,
    webhooks: Vec<Webhook>,
    pay_address: NanoAddress,
    expires_at: DateTime<Utc>,
    payments: Vec<Payment>,
}

pub struct SettlementWorker<B> {
    db: B,
    client: NanoWebsocket,
    events: NodeEventStreams,
    commands: mpsc::Receiver<Command>,
    sender: PipelineSender,
    notifiers: NotifierRegistry<B>,
    producers: EventProducers,
    config: SettlementConfig,
    pending: Vec<PendingInvoice>,
}

impl<B: PaymentGatewayDatabase> SettlementWorker<B> {
    /// Build the worker and spawn its actor task. Do not await the returned JoinHandle, it runs until the command
    /// channel closes.
    pub fn spawn(
        db: B,
        websocket_url: &str,
        sender: PipelineSender,
        notifiers: NotifierRegistry<B>,
        producers: EventProducers,
        config: SettlementConfig,
    ) -> Result<(SettlementHandle, JoinHandle<()>), SettlementError> {
        let (client, events) = NanoWebsocket::new(websocket_url)?;
        let (tx, commands) = mpsc::channel(64);
        let worker =
            Self { db, client, events, commands, sender, notifiers, producers, config, pending: Vec::new() };
        let join = tokio::spawn(worker.run());
        Ok((SettlementHandle { tx }, join))
    }

    async fn run(mut self) {
        info!("⏱️ Settlement worker started");
        loop {
            let next_wake = self.next_wake();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Listen { invoice, service, webhooks, reply }) => {
                        let result = self.start_listening(invoice, service, webhooks).await;
                        let _ = reply.send(result);
                    },
                    None => {
                        info!("⏱️ Settlement worker command channel closed, shutting down");
                        if self.client.is_connected() {
                            self.client.close().await;
                        }
                        break;
                    },
                },
                Some(event) = self.events.payments.recv() => {
                    if let Err(e) = self.on_payment(event).await {
                        error!("⏱️ Error handling payment event: {e}");
                    }
                },
                Some(close) = self.events.closes.recv() => {
                    if close.deliberate {
                        debug!("⏱️ Node stream closed by client");
                    } else {
                        self.on_unexpected_close(&close.reason);
                    }
                },
                _ = tokio::time::sleep_until(next_wake), if !self.pending.is_empty() => {
                    if let Err(e) = self.reap_expired().await {
                        error!("⏱️ Error reaping expired invoices: {e}");
                    }
                },
            }
        }
    }

    /// The reaper wakes at the nearest deadline, but never sleeps longer than the configured ceiling, so no
    /// invoice waits past its own expiry and an idle worker does not busy-poll.
    fn next_wake(&self) -> Instant {
        let now = Utc::now();
        let delay = self
            .pending
            .iter()
            .map(|p| p.expires_at)
            .min()
            .map(|deadline| (deadline - now).to_std().unwrap_or(std::time::Duration::ZERO))
            .unwrap_or(self.config.reaper_ceiling)
            .min(self.config.reaper_ceiling);
        Instant::now() + delay
    }

    async fn start_listening(
        &mut self,
        invoice: Invoice,
        service: Option<Service>,
        webhooks: Vec<Webhook>,
    ) -> Result<(), SettlementError> {
        let pay_address = invoice.pay_address.clone().ok_or(SettlementError::MissingPayAddress)?;
        if invoice.expires_at <= Utc::now() {
            return Err(SettlementError::DeadlinePassed);
        }
        self.client.connect().await?;
        self.client.subscribe(&pay_address).await?;
        info!("⏱️ Listening for payments to {} accounts", self.client.watched_account_count());
        let notifier = self.notifiers.get(&invoice.id).await?;
        notifier.start().await?;
        self.pending.push(PendingInvoice {
            expires_at: invoice.expires_at,
            pay_address,
            invoice,
            service,
            webhooks,
            payments: Vec::new(),
        });
        Ok(())
    }

    async fn on_payment(&mut self, event: SendEvent) -> Result<(), SettlementError> {
        // The stream can have frames in flight for an address we already unsubscribed; with the entry gone they
        // are ignored here.
        let Some(index) = self.pending.iter().position(|p| p.pay_address == event.to) else {
            trace!("⏱️ Ignoring transfer {} to unwatched account {}", event.hash, event.to);
            return Ok(());
        };
        let entry = &mut self.pending[index];
        if event.from == entry.pay_address {
            warn!("⏱️ Ignoring self-transfer on invoice {}: {}", entry.invoice.id, event.hash);
            return Ok(());
        }
        if entry.payments.iter().any(|p| p.hash == event.hash) {
            debug!("⏱️ Transfer {} already seen for invoice {}", event.hash, entry.invoice.id);
            return Ok(());
        }
        let amount = match event.amount.to_nano() {
            Ok(amount) => amount,
            Err(e) => {
                warn!("⏱️ Ignoring transfer {} with unrepresentable amount: {e}", event.hash);
                return Ok(());
            },
        };
        if amount < self.config.min_amount {
            warn!("⏱️ Payment amount too low on invoice {}: {amount}", entry.invoice.id);
            return Ok(());
        }

        let payment = Payment {
            from: event.from,
            to: event.to,
            amount,
            amount_raws: event.amount,
            hash: event.hash,
            timestamp: event.timestamp,
        };
        info!("💰️ New payment for invoice {}: {}", entry.invoice.id, payment.hash);
        entry.payments.push(payment.clone());

        let invoice = entry.invoice.clone();
        let service = entry.service.clone();
        let webhooks = entry.webhooks.clone();
        let payments = entry.payments.clone();

        // Persist and notify before the settlement decision, so recorded state is never ahead of the decision
        // that triggered it.
        self.send(QueueName::PaymentWrite, MessageBody::write(invoice.clone(), payment.clone(), service, webhooks))
            .await?;
        self.send(QueueName::PaymentPusher, MessageBody::push(invoice.clone(), payments.clone())).await?;
        for producer in &self.producers.payment_received_producers {
            producer.publish_event(PaymentReceivedEvent::new(invoice.clone(), payment.clone())).await;
        }

        let paid_total: NanoAmount = payments.iter().map(|p| p.amount).sum();
        if paid_total >= invoice.price {
            self.remove_pending(index, StopReason::Paid).await?;
            let paid = self.db.update_invoice_status(&invoice.id, InvoiceStatus::Paid).await?;
            info!("💰️ Invoice {} fully paid with {} payments", paid.id, payments.len());
            for producer in &self.producers.invoice_paid_producers {
                producer.publish_event(InvoicePaidEvent::new(paid.clone(), payments.clone())).await;
            }
            self.send(QueueName::PaymentReceiver, MessageBody::receive(paid, payments)).await?;
        } else if payments.len() >= self.config.max_payments_per_invoice {
            self.remove_pending(index, StopReason::TooManyPayments).await?;
            warn!("💰️ Max payments reached for invoice {}; listening stopped", invoice.id);
        }
        Ok(())
    }

    /// Walk every tracked invoice and expire those past their deadline. Expiry is the expected termination path:
    /// it is informational, never an error.
    async fn reap_expired(&mut self) -> Result<(), SettlementError> {
        let now = Utc::now();
        while let Some(index) = self.pending.iter().position(|p| p.expires_at <= now) {
            let invoice_id = self.pending[index].invoice.id.clone();
            info!("⏱️ Invoice {invoice_id} expired");
            self.remove_pending(index, StopReason::Expired).await?;
            match self.db.update_invoice_status(&invoice_id, InvoiceStatus::Expired).await {
                Ok(expired) => {
                    for producer in &self.producers.invoice_expired_producers {
                        producer.publish_event(InvoiceExpiredEvent::new(expired.clone())).await;
                    }
                },
                Err(PaymentGatewayError::InvalidStatusChange { current, .. }) => {
                    debug!("⏱️ Invoice {invoice_id} was already {current} when the reaper reached it");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Unsubscribe the invoice's address, stop its notifier, and drop the tracking entry. When the last entry is
    /// gone the node connection is closed.
    async fn remove_pending(&mut self, index: usize, reason: StopReason) -> Result<(), SettlementError> {
        let entry = self.pending.remove(index);
        self.client.unsubscribe(&entry.pay_address).await?;
        let notifier = self.notifiers.get(&entry.invoice.id).await?;
        notifier.stop(reason).await?;
        self.notifiers.remove(&entry.invoice.id).await;
        if self.pending.is_empty() && self.client.is_connected() {
            self.client.close().await;
        }
        Ok(())
    }

    fn on_unexpected_close(&mut self, reason: &str) {
        error!(
            "🔌️ Node stream dropped unexpectedly ({reason}); {} invoices lose their listener. Operator attention \
             required: re-enqueue their listen messages after restart.",
            self.pending.len()
        );
        self.client.reset();
        self.pending.clear();
    }

    async fn send(&self, queue: QueueName, body: MessageBody) -> Result<(), SettlementError> {
        self.sender.send(queue, body).await.map_err(|e| SettlementError::Pipeline(e.to_string()))
    }
}
