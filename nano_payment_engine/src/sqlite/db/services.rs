use sqlx::SqliteConnection;

use crate::{
    db_types::{Service, Webhook},
    traits::PaymentGatewayError,
};

pub async fn fetch_service(
    service_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Service>, PaymentGatewayError> {
    let service = sqlx::query_as::<_, Service>(
        "SELECT id, slug, name, website, contact_email FROM services WHERE id = $1",
    )
    .bind(service_id)
    .fetch_optional(conn)
    .await?;
    Ok(service)
}

pub async fn fetch_webhooks(
    service_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Webhook>, PaymentGatewayError> {
    let webhooks = sqlx::query_as::<_, Webhook>(
        "SELECT id, service_id, url, secret, active, event_types FROM webhooks WHERE service_id = $1 ORDER BY id",
    )
    .bind(service_id)
    .fetch_all(conn)
    .await?;
    Ok(webhooks)
}
