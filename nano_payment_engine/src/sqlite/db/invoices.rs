use sqlx::SqliteConnection;

use crate::{
    db_types::{Invoice, InvoiceId, InvoiceStatus, NanoAddress, NewInvoice},
    helpers::generate_invoice_id,
    traits::PaymentGatewayError,
};

/// The first chain index handed out. Indexes below this are reserved for legacy sequential invoices.
const FIRST_CHAIN_INDEX: i64 = 1000;

/// Insert a new invoice, reserving the next free chain derivation index in the same statement. The pay address is
/// patched in afterwards by [`set_pay_address`]: two-phase creation keeps index reservation atomic while the
/// address derivation happens outside the database.
pub async fn insert_invoice(
    invoice: NewInvoice,
    conn: &mut SqliteConnection,
) -> Result<Invoice, PaymentGatewayError> {
    let id = generate_invoice_id();
    let result = sqlx::query_as::<_, Invoice>(
        r#"
            INSERT INTO invoices
                (id, expires_at, price, currency, recipient_address, chain_index, title, description, metadata,
                 redirect_url, service_id)
            VALUES ($1, $2, $3, $4, $5,
                    (SELECT COALESCE(MAX(chain_index), $6 - 1) + 1 FROM invoices),
                    $7, $8, $9, $10, $11)
            RETURNING *;
        "#,
    )
    .bind(id)
    .bind(invoice.expires_at)
    .bind(invoice.price)
    .bind(invoice.currency)
    .bind(invoice.recipient_address)
    .bind(FIRST_CHAIN_INDEX)
    .bind(invoice.title)
    .bind(invoice.description)
    .bind(invoice.metadata)
    .bind(invoice.redirect_url)
    .bind(invoice.service_id.clone())
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_foreign_key_violation() => {
            PaymentGatewayError::ServiceNotFound(invoice.service_id)
        },
        _ => PaymentGatewayError::from(e),
    })?;
    Ok(result)
}

pub async fn set_pay_address(
    id: &InvoiceId,
    address: &NanoAddress,
    conn: &mut SqliteConnection,
) -> Result<Invoice, PaymentGatewayError> {
    sqlx::query_as::<_, Invoice>("UPDATE invoices SET pay_address = $1 WHERE id = $2 RETURNING *")
        .bind(address)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| PaymentGatewayError::InvoiceNotFound(id.clone()))
}

pub async fn fetch_invoice(
    id: &InvoiceId,
    conn: &mut SqliteConnection,
) -> Result<Option<Invoice>, PaymentGatewayError> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(invoice)
}

/// Transition an invoice out of Pending. Pending is the only state with outgoing edges, so the guard is a simple
/// `status = 'Pending'` predicate; trying to re-finalise a terminal invoice reports the actual stored status.
pub async fn update_status(
    id: &InvoiceId,
    status: InvoiceStatus,
    conn: &mut SqliteConnection,
) -> Result<Invoice, PaymentGatewayError> {
    let updated = sqlx::query_as::<_, Invoice>(
        "UPDATE invoices SET status = $1 WHERE id = $2 AND status = 'Pending' RETURNING *",
    )
    .bind(status)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(invoice) => Ok(invoice),
        None => match fetch_invoice(id, conn).await? {
            Some(existing) => Err(PaymentGatewayError::InvalidStatusChange {
                id: id.clone(),
                current: existing.status,
                requested: status,
            }),
            None => Err(PaymentGatewayError::InvoiceNotFound(id.clone())),
        },
    }
}
