//! The pipeline stages. Each stage validates the message fields it requires (a missing field is fatal for the
//! stage), performs its side effects, and enqueues any follow-on messages last, so a redelivered message can only
//! repeat work that is idempotent.
use log::*;
use npg_common::NanoAmount;
use serde_json::json;

use crate::{
    node::WalletFactory,
    notifier::NotifierRegistry,
    pipeline::{
        dispatcher::PipelineError,
        messages::{MessageBody, PipelineSender, QueueName},
        pubsub::PubSubChannel,
        webhook::WebhookDeliverer,
        WEBHOOK_EVENT_INVOICE_PAID,
    },
    traits::{InsertPaymentResult, InvoiceManagement, NotifierManagement, WalletStateManagement},
};

/// payment-write: persist the payment row, then fan out webhook deliveries. The insert is idempotent by hash, so
/// a redelivered message cannot create a duplicate row.
pub async fn payment_write<B: InvoiceManagement>(
    db: &B,
    sender: &PipelineSender,
    body: MessageBody,
) -> Result<(), PipelineError> {
    let payment = body.payment.ok_or(PipelineError::MissingField("payment"))?;
    let webhooks = body.webhooks.ok_or(PipelineError::MissingField("webhooks"))?;
    let invoice = body.invoice;
    match db.insert_payment(&invoice.id, &payment).await? {
        InsertPaymentResult::Inserted => info!("💾️ New payment stored: {}", payment.hash),
        InsertPaymentResult::AlreadyExists(hash) => {
            info!("💾️ Payment {hash} was already recorded; continuing");
        },
    }
    for webhook in webhooks.into_iter().filter(|w| w.active && w.is_subscribed_to(WEBHOOK_EVENT_INVOICE_PAID)) {
        sender
            .send(
                QueueName::WebhookDelivery,
                MessageBody::webhook_delivery(
                    invoice.clone(),
                    payment.clone(),
                    body.service.clone(),
                    webhook,
                    WEBHOOK_EVENT_INVOICE_PAID.to_string(),
                ),
            )
            .await?;
    }
    Ok(())
}

/// payment-pusher: hand the latest payment to the invoice's notification hub and publish the cumulative snapshot
/// on the pub/sub channel.
pub async fn payment_push<B: NotifierManagement, P: PubSubChannel>(
    notifiers: &NotifierRegistry<B>,
    pubsub: &P,
    body: MessageBody,
) -> Result<(), PipelineError> {
    let payments = body.payments.ok_or(PipelineError::MissingField("payments"))?;
    let invoice = body.invoice;
    if let Some(latest) = payments.last() {
        let notifier = notifiers.get(&invoice.id).await?;
        notifier.notify(latest).await?;
    }
    let paid_total: NanoAmount = payments.iter().map(|p| p.amount).sum();
    let remaining = invoice.price - paid_total;
    let event_name = if remaining > NanoAmount::default() { "invoice.partially_paid" } else { "invoice.paid" };
    let payload = json!({
        "payments": payments,
        "price": invoice.price.as_nano(),
        "paid_total": paid_total.as_nano(),
        "remaining": remaining.as_nano(),
    });
    pubsub.publish(invoice.id.as_str(), event_name, payload).await;
    Ok(())
}

/// webhook-delivery: POST the event and enqueue the outcome record. Failed deliveries are logged and (by default)
/// not retried, so a flaky merchant endpoint cannot hold up settlement.
pub async fn webhook_delivery(
    deliverer: &WebhookDeliverer,
    sender: &PipelineSender,
    body: MessageBody,
) -> Result<(), PipelineError> {
    let payment = body.payment.ok_or(PipelineError::MissingField("payment"))?;
    let webhook = body.webhook.ok_or(PipelineError::MissingField("webhook"))?;
    let webhook_type = body.webhook_type.ok_or(PipelineError::MissingField("webhook_type"))?;
    let invoice = body.invoice;
    if let Some(record) =
        deliverer.deliver(&invoice, &payment, body.service.as_ref(), &webhook, &webhook_type).await?
    {
        sender.send(QueueName::WebhookDeliveryWrite, MessageBody::webhook_delivery_write(invoice, record)).await?;
    }
    Ok(())
}

/// webhook-delivery-write: persist the delivery record.
pub async fn webhook_delivery_write<B: InvoiceManagement>(
    db: &B,
    body: MessageBody,
) -> Result<(), PipelineError> {
    let delivery = body.webhook_delivery.ok_or(PipelineError::MissingField("webhook_delivery"))?;
    db.insert_webhook_delivery(&delivery).await?;
    info!("💾️ New webhook delivery stored: {}", delivery.id);
    Ok(())
}

/// payment-receiver: pull each observed transfer into the invoice's derived account, in payment order, then hand
/// off to the sender stage.
pub async fn payment_receive<B: WalletStateManagement>(
    db: &B,
    wallets: &WalletFactory,
    sender: &PipelineSender,
    body: MessageBody,
) -> Result<(), PipelineError> {
    let payments = body.payments.ok_or(PipelineError::MissingField("payments"))?;
    let invoice = body.invoice;
    let mut wallet = wallets.wallet_for_index(invoice.chain_index, db.clone())?;
    wallet.init().await?;
    for payment in &payments {
        let hash = wallet.receive(&payment.hash, payment.amount_raws).await?;
        info!("⛓️ Payment received on-chain: {hash}");
    }
    sender.send(QueueName::PaymentSender, MessageBody::send(invoice)).await?;
    Ok(())
}

/// payment-sender: sweep the invoice's account to the merchant's recipient address.
pub async fn payment_send<B: WalletStateManagement>(
    db: &B,
    wallets: &WalletFactory,
    body: MessageBody,
) -> Result<(), PipelineError> {
    let invoice = body.invoice;
    let mut wallet = wallets.wallet_for_index(invoice.chain_index, db.clone())?;
    wallet.init().await?;
    let hash = wallet.send_all(&invoice.recipient_address).await?;
    info!("⛓️ Settlement for invoice {} sent to {} (block {hash})", invoice.id, invoice.recipient_address);
    Ok(())
}
