use serde::{Deserialize, Serialize};

use crate::db_types::{Invoice, Payment};

/// Fired for every accepted (non-dust, non-self) payment observed on an invoice's pay address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceivedEvent {
    pub invoice: Invoice,
    pub payment: Payment,
}

impl PaymentReceivedEvent {
    pub fn new(invoice: Invoice, payment: Payment) -> Self {
        Self { invoice, payment }
    }
}

/// Fired once when an invoice's cumulative payments reach its price. The payment list is exactly the accepted
/// payments in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicePaidEvent {
    pub invoice: Invoice,
    pub payments: Vec<Payment>,
}

impl InvoicePaidEvent {
    pub fn new(invoice: Invoice, payments: Vec<Payment>) -> Self {
        Self { invoice, payments }
    }
}

/// Fired once when an invoice's deadline passes before it is fully paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceExpiredEvent {
    pub invoice: Invoice,
}

impl InvoiceExpiredEvent {
    pub fn new(invoice: Invoice) -> Self {
        Self { invoice }
    }
}
