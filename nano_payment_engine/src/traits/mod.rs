//! Interface contracts for payment gateway database backends.
//!
//! * [`InvoiceManagement`]: invoices, payments, services and webhook registrations.
//! * [`WalletStateManagement`]: the per-account balance/frontier record that serialises account-chain mutations.
//! * [`NotifierManagement`]: durable state for the per-invoice payment notifiers.
//! * [`PaymentGatewayDatabase`]: the umbrella trait a complete backend implements.
mod invoice_management;
mod notifier_management;
mod payment_gateway_database;
mod wallet_management;

pub use invoice_management::{InsertPaymentResult, InvoiceManagement};
pub use notifier_management::NotifierManagement;
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
pub use wallet_management::{UpdateWalletState, WalletStateManagement};
