//! Webhook delivery: a signed JSON POST to each registered endpoint, with the full exchange recorded.
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use log::*;
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    db_types::{Invoice, Payment, Service, Webhook, WebhookDelivery},
    pipeline::dispatcher::PipelineError,
};

/// Hex HMAC-SHA256 over the exact JSON body, carried in the `X-Signature` header so receivers can authenticate the
/// payload against their registered secret.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Clone)]
pub struct WebhookDeliverer {
    http: reqwest::Client,
    timeout: Duration,
    /// When false (the default), a failed delivery is logged and dropped: webhooks are best-effort and must never
    /// block or jeopardize on-chain settlement. When true, transport failures propagate so the pipeline redelivers.
    retry: bool,
}

impl WebhookDeliverer {
    pub fn new(timeout: Duration, retry: bool) -> Self {
        Self { http: reqwest::Client::new(), timeout, retry }
    }

    /// POST the event to the webhook's URL. Returns the delivery record to persist, or `None` when the attempt
    /// failed before a response and retries are disabled.
    pub async fn deliver(
        &self,
        invoice: &Invoice,
        payment: &Payment,
        service: Option<&Service>,
        webhook: &Webhook,
        webhook_type: &str,
    ) -> Result<Option<WebhookDelivery>, PipelineError> {
        let started_at = Utc::now();
        let delivery_id = Uuid::new_v4().to_string();
        let request_body = serde_json::to_string(&json!({
            "type": webhook_type,
            "invoice": invoice,
            "service": service,
            "payment": payment,
        }))
        .map_err(|e| PipelineError::WebhookDelivery(format!("Could not serialize payload: {e}")))?;

        let mut request_headers = serde_json::Map::new();
        request_headers.insert("Content-Type".into(), "application/json".into());
        let mut request = self
            .http
            .post(&webhook.url)
            .timeout(self.timeout)
            .header("Content-Type", "application/json");
        if let Some(secret) = webhook.secret.as_deref().filter(|s| !s.is_empty()) {
            let signature = sign_payload(secret, &request_body);
            request_headers.insert("X-Signature".into(), signature.clone().into());
            request = request.header("X-Signature", signature);
        }

        let response = match request.body(request_body.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("🪝️ Webhook delivery to {} failed: {e}", webhook.url);
                if self.retry {
                    return Err(PipelineError::WebhookDelivery(e.to_string()));
                }
                return Ok(None);
            },
        };

        let status_code = response.status().as_u16() as i64;
        let success = response.status().is_success();
        let response_headers: serde_json::Map<String, serde_json::Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.to_string(), value.to_str().unwrap_or("<binary>").to_string().into())
            })
            .collect();
        let response_body = response.text().await.unwrap_or_default();
        let completed_at = Utc::now();
        info!("🪝️ Webhook {webhook_type} delivered to {} ({status_code})", webhook.url);

        Ok(Some(WebhookDelivery {
            id: delivery_id,
            webhook_id: webhook.id,
            event_type: webhook_type.to_string(),
            success,
            url: webhook.url.clone(),
            status_code: Some(status_code),
            request_headers: serde_json::Value::Object(request_headers).to_string(),
            request_body,
            response_headers: serde_json::Value::Object(response_headers).to_string(),
            response_body,
            started_at,
            completed_at,
            redelivery: false,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signature_is_stable_hex_hmac() {
        // Known-answer: HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let signature = sign_payload("key", "The quick brown fox jumps over the lazy dog");
        assert_eq!(signature, "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8");
    }

    #[test]
    fn signature_depends_on_secret() {
        let body = r#"{"type":"invoice.paid"}"#;
        assert_ne!(sign_payload("secret-a", body), sign_payload("secret-b", body));
    }
}
