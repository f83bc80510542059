use sqlx::SqliteConnection;

use crate::{
    db_types::{InvoiceId, Payment},
    traits::{InsertPaymentResult, PaymentGatewayError},
};

/// Record a payment against an invoice. The payments table is keyed by the transfer hash, so redelivering a
/// write-stage message is harmless: the second insert reports `AlreadyExists` instead of creating a duplicate row.
pub async fn idempotent_insert(
    invoice_id: &InvoiceId,
    payment: &Payment,
    conn: &mut SqliteConnection,
) -> Result<InsertPaymentResult, PaymentGatewayError> {
    let result = sqlx::query(
        r#"
            INSERT INTO payments (invoice_id, from_address, to_address, amount, amount_raws, hash, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7);
        "#,
    )
    .bind(invoice_id)
    .bind(&payment.from)
    .bind(&payment.to)
    .bind(payment.amount)
    .bind(payment.amount_raws.to_string())
    .bind(&payment.hash)
    .bind(payment.timestamp)
    .execute(conn)
    .await;
    match result {
        Ok(_) => Ok(InsertPaymentResult::Inserted),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            Ok(InsertPaymentResult::AlreadyExists(payment.hash.clone()))
        },
        Err(e) => Err(PaymentGatewayError::from(e)),
    }
}

/// All payments for an invoice, in the order they were observed.
pub async fn fetch_payments(
    invoice_id: &InvoiceId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, PaymentGatewayError> {
    let payments = sqlx::query_as::<_, Payment>(
        r#"
            SELECT from_address, to_address, amount, amount_raws, hash, timestamp
            FROM payments WHERE invoice_id = $1 ORDER BY id;
        "#,
    )
    .bind(invoice_id)
    .fetch_all(conn)
    .await?;
    Ok(payments)
}
