use thiserror::Error;

use crate::{
    db_types::{BlockHash, InvoiceId, InvoiceStatus},
    traits::{InvoiceManagement, NotifierManagement, WalletStateManagement},
};

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Invoice {0} does not exist")]
    InvoiceNotFound(InvoiceId),
    #[error("Service {0} does not exist")]
    ServiceNotFound(String),
    #[error("Payment {0} has already been recorded")]
    PaymentAlreadyExists(BlockHash),
    #[error("Invoice {id} is {current} and cannot become {requested}")]
    InvalidStatusChange { id: InvoiceId, current: InvoiceStatus, requested: InvoiceStatus },
}

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        Self::DatabaseError(e.to_string())
    }
}

/// The highest-level contract for gateway backends: everything the settlement pipeline needs from storage.
pub trait PaymentGatewayDatabase:
    Clone + Send + Sync + InvoiceManagement + WalletStateManagement + NotifierManagement + 'static
{
    /// The URL of the database.
    fn url(&self) -> &str;
}
