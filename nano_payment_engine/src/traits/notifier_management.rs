use crate::{
    db_types::{InvoiceId, Payment},
    traits::PaymentGatewayError,
};

/// Durable state for the per-invoice payment notifiers, so a notifier can hibernate and pick up where it left off:
/// whether it has been started, and a bounded window of the most recent payment events for backlog replay.
pub trait NotifierManagement: Clone {
    fn set_notifier_started(
        &self,
        invoice_id: &InvoiceId,
        started: bool,
    ) -> impl std::future::Future<Output = Result<(), PaymentGatewayError>> + Send;

    fn notifier_started(
        &self,
        invoice_id: &InvoiceId,
    ) -> impl std::future::Future<Output = Result<bool, PaymentGatewayError>> + Send;

    /// Store a payment event keyed by its hash, keeping only the most recent `retention` events per invoice.
    fn store_notifier_event(
        &self,
        invoice_id: &InvoiceId,
        payment: &Payment,
        retention: usize,
    ) -> impl std::future::Future<Output = Result<(), PaymentGatewayError>> + Send;

    /// The most recent `limit` events, returned oldest-first so they can be replayed in order.
    fn fetch_notifier_backlog(
        &self,
        invoice_id: &InvoiceId,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Payment>, PaymentGatewayError>> + Send;

    /// Remove the started flag and all stored events: the notifier is fully reset, not just quiesced.
    fn purge_notifier(
        &self,
        invoice_id: &InvoiceId,
    ) -> impl std::future::Future<Output = Result<(), PaymentGatewayError>> + Send;
}
