use log::warn;
use sqlx::{Row, SqliteConnection};

use crate::{
    db_types::{InvoiceId, Payment},
    traits::PaymentGatewayError,
};

pub async fn set_started(
    invoice_id: &InvoiceId,
    started: bool,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT INTO notifier_state (invoice_id, started) VALUES ($1, $2)
            ON CONFLICT (invoice_id) DO UPDATE SET started = $2;
        "#,
    )
    .bind(invoice_id)
    .bind(started)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn is_started(invoice_id: &InvoiceId, conn: &mut SqliteConnection) -> Result<bool, PaymentGatewayError> {
    let row = sqlx::query("SELECT started FROM notifier_state WHERE invoice_id = $1")
        .bind(invoice_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|r| r.get::<bool, _>("started")).unwrap_or(false))
}

/// Store an event keyed by its payment hash, then trim the invoice's history to the `retention` most recent rows.
pub async fn store_event(
    invoice_id: &InvoiceId,
    payment: &Payment,
    retention: usize,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    let payload = serde_json::to_string(payment)
        .map_err(|e| PaymentGatewayError::DatabaseError(format!("Could not serialize payment: {e}")))?;
    sqlx::query(
        r#"
            INSERT INTO notifier_events (invoice_id, hash, payload) VALUES ($1, $2, $3)
            ON CONFLICT (invoice_id, hash) DO NOTHING;
        "#,
    )
    .bind(invoice_id)
    .bind(&payment.hash)
    .bind(payload)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        r#"
            DELETE FROM notifier_events WHERE invoice_id = $1 AND seq NOT IN (
                SELECT seq FROM notifier_events WHERE invoice_id = $1 ORDER BY seq DESC LIMIT $2
            );
        "#,
    )
    .bind(invoice_id)
    .bind(retention as i64)
    .execute(conn)
    .await?;
    Ok(())
}

/// The `limit` most recent events, replayed oldest-first.
pub async fn fetch_backlog(
    invoice_id: &InvoiceId,
    limit: usize,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, PaymentGatewayError> {
    let rows = sqlx::query(
        "SELECT payload FROM notifier_events WHERE invoice_id = $1 ORDER BY seq DESC LIMIT $2",
    )
    .bind(invoice_id)
    .bind(limit as i64)
    .fetch_all(conn)
    .await?;
    let mut backlog = Vec::with_capacity(rows.len());
    for row in rows.into_iter().rev() {
        let payload: String = row.get("payload");
        match serde_json::from_str::<Payment>(&payload) {
            Ok(payment) => backlog.push(payment),
            Err(e) => warn!("📣️ Skipping corrupt notifier event for invoice {invoice_id}: {e}"),
        }
    }
    Ok(backlog)
}

pub async fn purge(invoice_id: &InvoiceId, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query("DELETE FROM notifier_events WHERE invoice_id = $1").bind(invoice_id).execute(&mut *conn).await?;
    sqlx::query("DELETE FROM notifier_state WHERE invoice_id = $1").bind(invoice_id).execute(conn).await?;
    Ok(())
}
