//! Request handler definitions.
//!
//! Handlers stay thin: validation lives in [`crate::data_objects`], and everything stateful goes through the
//! [`ApiContext`] assembled at startup. Anything long-running is awaited, never blocked on.
use actix_web::{get, post, web, HttpResponse, Responder};
use futures::stream;
use log::*;
use nano_payment_engine::{
    db_types::InvoiceId,
    notifier::SessionEvent,
    pipeline::{MessageBody, QueueName},
    InvoiceManagement,
};
use serde_json::json;

use crate::{
    data_objects::{InvoiceCreateRequest, InvoiceCreateResponse},
    errors::ServerError,
    server::ApiContext,
};

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "👍️" }))
}

/// Create an invoice. The chain index is reserved by the insert; the pay address is derived from it and patched in
/// immediately after, and only then is the settlement pipeline told to listen. An invoice is never exposed
/// without its receive address.
#[post("/api/invoice")]
pub async fn create_invoice(
    ctx: web::Data<ApiContext>,
    body: web::Json<InvoiceCreateRequest>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    let new_invoice = request.validate(&ctx.config)?;
    let service = ctx
        .db
        .fetch_service(&new_invoice.service_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Service {}", new_invoice.service_id)))?;
    let invoice = ctx.db.insert_invoice(new_invoice).await?;
    let pay_address = ctx
        .wallets
        .address_for_index(invoice.chain_index)
        .map_err(|e| ServerError::BackendError(e.to_string()))?;
    let invoice = ctx.db.set_pay_address(&invoice.id, &pay_address).await?;
    let webhooks = ctx.db.fetch_webhooks(&service.id).await?;
    info!("🧾️ New invoice created: {} ({} for {})", invoice.id, invoice.price, service.name);
    ctx.sender
        .send(QueueName::PaymentListener, MessageBody::listen(invoice.clone(), Some(service), webhooks))
        .await
        .map_err(|e| ServerError::BackendError(e.to_string()))?;
    Ok(HttpResponse::Ok().json(InvoiceCreateResponse {
        id: invoice.id,
        pay_address,
        expires_at: invoice.expires_at,
    }))
}

#[get("/api/invoice/{id}")]
pub async fn get_invoice(
    ctx: web::Data<ApiContext>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let id = InvoiceId::from(path.into_inner());
    let invoice = ctx
        .db
        .fetch_invoice(&id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Invoice {id}")))?;
    let service = ctx.db.fetch_service(&invoice.service_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "invoice": invoice, "service": service })))
}

/// Stream an invoice's payments as newline-delimited JSON. The persisted backlog (oldest first) is replayed
/// before live events. Rejected with 409 before the invoice's notifier has started and with 429 at the session
/// cap.
#[get("/api/invoice/{id}/payments")]
pub async fn subscribe_payments(
    ctx: web::Data<ApiContext>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServerError> {
    let id = InvoiceId::from(path.into_inner());
    if ctx.db.fetch_invoice(&id).await?.is_none() {
        return Err(ServerError::NoRecordFound(format!("Invoice {id}")));
    }
    let notifier = ctx.notifiers.get(&id).await?;
    let receiver = notifier.subscribe().await?;
    debug!("🧾️ New payment stream subscriber for invoice {id}");
    let stream = stream::unfold(receiver, |mut receiver| async move {
        let event = receiver.recv().await?;
        let line = match event {
            SessionEvent::Payment(payment) => serde_json::to_string(&payment).ok()?,
            SessionEvent::Closed(reason) => {
                json!({ "event": "closed", "code": reason.close_code() }).to_string()
            },
        };
        Some((Ok::<_, actix_web::Error>(web::Bytes::from(format!("{line}\n"))), receiver))
    });
    Ok(HttpResponse::Ok().content_type("application/x-ndjson").streaming(stream))
}
