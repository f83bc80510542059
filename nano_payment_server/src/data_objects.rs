use chrono::{DateTime, Utc};
use nano_payment_engine::{
    db_types::{InvoiceId, NanoAddress, NewInvoice},
    helpers::check_address,
};
use npg_common::{NanoAmount, NANO_CURRENCY_CODE};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{config::ServerConfig, errors::ServerError};

const ADDRESS_PATTERN: &str = r"^nano_[13456789abcdefghijkmnopqrstuwxyz]{60}$";
const MAX_TITLE_LENGTH: usize = 40;
const MIN_TITLE_LENGTH: usize = 2;
const MAX_DESCRIPTION_LENGTH: usize = 512;
const MAX_REDIRECT_URL_LENGTH: usize = 512;

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceCreateRequest {
    pub title: String,
    pub description: Option<String>,
    /// The invoice price in XNO.
    pub price: f64,
    pub recipient_address: String,
    pub metadata: Option<serde_json::Value>,
    pub redirect_url: Option<String>,
    pub service_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceCreateResponse {
    pub id: InvoiceId,
    pub pay_address: NanoAddress,
    pub expires_at: DateTime<Utc>,
}

impl InvoiceCreateRequest {
    /// Validate the request and convert it into an insertable record. All failures surface as 400s.
    pub fn validate(&self, config: &ServerConfig) -> Result<NewInvoice, ServerError> {
        let title = self.title.trim();
        if title.chars().count() < MIN_TITLE_LENGTH || title.chars().count() > MAX_TITLE_LENGTH {
            return Err(bad_request(format!(
                "title must be between {MIN_TITLE_LENGTH} and {MAX_TITLE_LENGTH} characters"
            )));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                return Err(bad_request(format!("description must be at most {MAX_DESCRIPTION_LENGTH} characters")));
            }
        }
        let price = NanoAmount::from_nano(self.price).map_err(|e| bad_request(e.to_string()))?;
        if price < config.min_invoice_amount || price > config.max_invoice_amount {
            return Err(bad_request(format!(
                "price must be between {} and {}",
                config.min_invoice_amount, config.max_invoice_amount
            )));
        }
        let recipient_address = validate_address(&self.recipient_address)?;
        if let Some(url) = &self.redirect_url {
            if url.chars().count() > MAX_REDIRECT_URL_LENGTH
                || !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(bad_request("redirect_url must be a http(s) URL".to_string()));
            }
        }
        if self.service_id.trim().is_empty() {
            return Err(bad_request("service_id must not be empty".to_string()));
        }
        let metadata = self
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).map_err(|e| bad_request(e.to_string())))
            .transpose()?;
        Ok(NewInvoice {
            expires_at: Utc::now() + config.invoice_expiration,
            price,
            currency: NANO_CURRENCY_CODE.to_string(),
            recipient_address,
            title: title.to_string(),
            description: self.description.clone(),
            metadata,
            redirect_url: self.redirect_url.clone(),
            service_id: self.service_id.clone(),
        })
    }
}

/// Check both the shape and the embedded checksum of a nano address.
pub fn validate_address(address: &str) -> Result<NanoAddress, ServerError> {
    let re = Regex::new(ADDRESS_PATTERN).unwrap();
    if !re.is_match(address) {
        return Err(bad_request(format!("'{address}' is not a valid nano address")));
    }
    let address = NanoAddress::from(address);
    check_address(&address).map_err(|e| bad_request(e.to_string()))?;
    Ok(address)
}

fn bad_request(message: String) -> ServerError {
    ServerError::InvalidRequestBody(message)
}

#[cfg(test)]
mod test {
    use nano_payment_engine::helpers::{derive_secret_key, AccountKeys};

    use super::*;

    fn valid_address() -> String {
        let secret = derive_secret_key(&"77".repeat(32), 1).unwrap();
        AccountKeys::from_secret(secret).address().as_str().to_string()
    }

    fn valid_request() -> InvoiceCreateRequest {
        InvoiceCreateRequest {
            title: "Coffee beans".into(),
            description: None,
            price: 1.5,
            recipient_address: valid_address(),
            metadata: None,
            redirect_url: None,
            service_id: "svc-1".into(),
        }
    }

    #[test]
    fn valid_requests_pass() {
        let config = ServerConfig::default();
        let new_invoice = valid_request().validate(&config).unwrap();
        assert_eq!(new_invoice.price, NanoAmount::from_nano(1.5).unwrap());
        assert_eq!(new_invoice.currency, "XNO");
        assert!(new_invoice.expires_at > Utc::now());
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        let config = ServerConfig::default();
        let mut request = valid_request();
        request.recipient_address = "nano_not_an_address".into();
        assert!(matches!(request.validate(&config), Err(ServerError::InvalidRequestBody(_))));

        // right shape, wrong checksum
        let mut corrupted = valid_address();
        corrupted.replace_range(10..11, if &corrupted[10..11] == "1" { "3" } else { "1" });
        request.recipient_address = corrupted;
        assert!(matches!(request.validate(&config), Err(ServerError::InvalidRequestBody(_))));
    }

    #[test]
    fn price_bounds_are_enforced() {
        let config = ServerConfig::default();
        let mut request = valid_request();
        request.price = 0.000001;
        assert!(request.validate(&config).is_err());
        request.price = 2_000_000.0;
        assert!(request.validate(&config).is_err());
        request.price = 0.00001;
        assert!(request.validate(&config).is_ok());
    }

    #[test]
    fn title_length_is_enforced() {
        let config = ServerConfig::default();
        let mut request = valid_request();
        request.title = "x".into();
        assert!(request.validate(&config).is_err());
        request.title = "x".repeat(41);
        assert!(request.validate(&config).is_err());
    }
}
