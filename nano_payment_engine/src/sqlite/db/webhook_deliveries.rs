use sqlx::SqliteConnection;

use crate::{db_types::WebhookDelivery, traits::PaymentGatewayError};

pub async fn insert_delivery(
    delivery: &WebhookDelivery,
    conn: &mut SqliteConnection,
) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT INTO webhook_deliveries
                (id, webhook_id, event_type, success, url, status_code, request_headers, request_body,
                 response_headers, response_body, started_at, completed_at, redelivery)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13);
        "#,
    )
    .bind(&delivery.id)
    .bind(delivery.webhook_id)
    .bind(&delivery.event_type)
    .bind(delivery.success)
    .bind(&delivery.url)
    .bind(delivery.status_code)
    .bind(&delivery.request_headers)
    .bind(&delivery.request_body)
    .bind(&delivery.response_headers)
    .bind(&delivery.response_body)
    .bind(delivery.started_at)
    .bind(delivery.completed_at)
    .bind(delivery.redelivery)
    .execute(conn)
    .await?;
    Ok(())
}
