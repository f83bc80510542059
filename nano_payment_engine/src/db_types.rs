//! The public data types used by the payment engine and its database backends.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use npg_common::{NanoAmount, RawAmount};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------      InvoiceId       --------------------------------------------------------

/// The opaque short code identifying an invoice, e.g. `4XK9-PM3A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct InvoiceId(pub String);

impl InvoiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InvoiceId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for InvoiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InvoiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for InvoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------     NanoAddress      --------------------------------------------------------

/// A lightweight wrapper around a `nano_…` account address string.
///
/// Wrapping the string keeps addresses from being mixed up with hashes and ids in signatures. Format and checksum
/// validation lives in [`crate::helpers::check_address`]; this type does not re-validate on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct NanoAddress(pub String);

impl NanoAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S: Into<String>> From<S> for NanoAddress {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Display for NanoAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------      BlockHash       --------------------------------------------------------

/// A 64-character uppercase hex block hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct BlockHash(pub String);

impl BlockHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode_upper(bytes))
    }

    pub fn to_bytes(&self) -> Result<[u8; 32], ConversionError> {
        let raw = hex::decode(&self.0).map_err(|e| ConversionError(format!("Invalid block hash {}: {e}", self.0)))?;
        raw.try_into().map_err(|_| ConversionError(format!("Block hash {} is not 32 bytes", self.0)))
    }
}

impl<S: Into<String>> From<S> for BlockHash {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConversionError(pub String);

//--------------------------------------    InvoiceStatus     --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// The invoice is open and the settlement worker is (or should be) listening for payments.
    Pending,
    /// Cumulative payments reached the invoice price. Terminal.
    Paid,
    /// The deadline passed before the invoice was paid in full. Terminal.
    Expired,
}

impl Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceStatus::Pending => write!(f, "Pending"),
            InvoiceStatus::Paid => write!(f, "Paid"),
            InvoiceStatus::Expired => write!(f, "Expired"),
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paid" => Ok(Self::Paid),
            "Expired" => Ok(Self::Expired),
            s => Err(ConversionError(format!("Invalid invoice status: {s}"))),
        }
    }
}

//--------------------------------------       Invoice        --------------------------------------------------------

/// An invoice row. `pay_address` is `None` only for the instant between index reservation and the address patch
/// during creation; by the time the pipeline sees an invoice it is always set.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub price: NanoAmount,
    pub currency: String,
    pub recipient_address: NanoAddress,
    pub pay_address: Option<NanoAddress>,
    pub status: InvoiceStatus,
    #[sqlx(try_from = "i64")]
    pub chain_index: u32,
    pub title: String,
    pub description: Option<String>,
    pub metadata: Option<String>,
    pub redirect_url: Option<String>,
    pub service_id: String,
}

/// The insert-side counterpart of [`Invoice`]. The id, chain index and pay address are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub expires_at: DateTime<Utc>,
    pub price: NanoAmount,
    pub currency: String,
    pub recipient_address: NanoAddress,
    pub title: String,
    pub description: Option<String>,
    pub metadata: Option<String>,
    pub redirect_url: Option<String>,
    pub service_id: String,
}

//--------------------------------------       Payment        --------------------------------------------------------

/// A single observed transfer into an invoice's pay address.
///
/// Immutable once observed. `amount` is the truncated micro-nano value used in settlement arithmetic; `amount_raws`
/// preserves the exact on-chain value as a string to avoid precision loss.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    #[sqlx(rename = "from_address")]
    pub from: NanoAddress,
    #[sqlx(rename = "to_address")]
    pub to: NanoAddress,
    pub amount: NanoAmount,
    #[sqlx(try_from = "String")]
    pub amount_raws: RawAmount,
    pub hash: BlockHash,
    pub timestamp: i64,
}

//--------------------------------------       Service        --------------------------------------------------------

/// Read-only registration data for the merchant service an invoice belongs to.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub website: Option<String>,
    pub contact_email: Option<String>,
}

//--------------------------------------       Webhook        --------------------------------------------------------

/// A registered webhook endpoint. `event_types` is a comma-separated list of subscribed event names.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub service_id: String,
    pub url: String,
    pub secret: Option<String>,
    pub active: bool,
    pub event_types: String,
}

impl Webhook {
    pub fn is_subscribed_to(&self, event_type: &str) -> bool {
        self.event_types.split(',').any(|t| t.trim() == event_type)
    }
}

//--------------------------------------   WebhookDelivery    --------------------------------------------------------

/// The record of a single webhook delivery attempt, successful or not.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_id: i64,
    pub event_type: String,
    pub success: bool,
    pub url: String,
    pub status_code: Option<i64>,
    pub request_headers: String,
    pub request_body: String,
    pub response_headers: String,
    pub response_body: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub redelivery: bool,
}

//--------------------------------------     WalletState      --------------------------------------------------------

/// The persisted chain state of one derived receive account: its confirmed balance and the hash of the most recent
/// block in its chain. This record is the serialization point that prevents account-chain forks: every block must
/// be built against the stored frontier and the frontier updated only after the node confirms the block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletState {
    pub balance: RawAmount,
    pub frontier: Option<BlockHash>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invoice_status_round_trip() {
        for status in [InvoiceStatus::Pending, InvoiceStatus::Paid, InvoiceStatus::Expired] {
            let s = status.to_string();
            assert_eq!(s.parse::<InvoiceStatus>().unwrap(), status);
        }
        assert!("Unpaid".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn webhook_event_type_matching() {
        let hook = Webhook {
            id: 1,
            service_id: "svc".into(),
            url: "https://example.com/hook".into(),
            secret: None,
            active: true,
            event_types: "invoice.paid, invoice.expired".into(),
        };
        assert!(hook.is_subscribed_to("invoice.paid"));
        assert!(hook.is_subscribed_to("invoice.expired"));
        assert!(!hook.is_subscribed_to("invoice.created"));
    }

    #[test]
    fn block_hash_bytes_round_trip() {
        let hash = BlockHash::from_bytes(&[0xAB; 32]);
        assert_eq!(hash.as_str().len(), 64);
        assert_eq!(hash.to_bytes().unwrap(), [0xAB; 32]);
        assert!(BlockHash::from("zz").to_bytes().is_err());
    }
}
