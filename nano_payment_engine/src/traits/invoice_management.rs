use crate::{
    db_types::{
        BlockHash,
        Invoice,
        InvoiceId,
        InvoiceStatus,
        NanoAddress,
        NewInvoice,
        Payment,
        Service,
        Webhook,
        WebhookDelivery,
    },
    traits::PaymentGatewayError,
};

/// The result of trying to record a payment. A payment whose hash is already on file is not an error: it is the
/// normal outcome of an at-least-once redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPaymentResult {
    Inserted,
    AlreadyExists(BlockHash),
}

pub trait InvoiceManagement: Clone {
    /// Insert a new invoice, atomically reserving the next free chain derivation index. The returned record has
    /// its id and chain index assigned but `pay_address` still unset.
    fn insert_invoice(
        &self,
        invoice: NewInvoice,
    ) -> impl std::future::Future<Output = Result<Invoice, PaymentGatewayError>> + Send;

    /// Patch the derived pay address onto a freshly created invoice. Returns the updated record.
    fn set_pay_address(
        &self,
        id: &InvoiceId,
        address: &NanoAddress,
    ) -> impl std::future::Future<Output = Result<Invoice, PaymentGatewayError>> + Send;

    fn fetch_invoice(
        &self,
        id: &InvoiceId,
    ) -> impl std::future::Future<Output = Result<Option<Invoice>, PaymentGatewayError>> + Send;

    /// Transition an invoice's status. Only Pending invoices may transition, and only to a terminal status;
    /// anything else is an [`PaymentGatewayError::InvalidStatusChange`].
    fn update_invoice_status(
        &self,
        id: &InvoiceId,
        status: InvoiceStatus,
    ) -> impl std::future::Future<Output = Result<Invoice, PaymentGatewayError>> + Send;

    fn fetch_service(
        &self,
        service_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Service>, PaymentGatewayError>> + Send;

    /// All webhooks registered for a service, active or not.
    fn fetch_webhooks(
        &self,
        service_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Webhook>, PaymentGatewayError>> + Send;

    /// Record a payment against an invoice. Idempotent by payment hash.
    fn insert_payment(
        &self,
        invoice_id: &InvoiceId,
        payment: &Payment,
    ) -> impl std::future::Future<Output = Result<InsertPaymentResult, PaymentGatewayError>> + Send;

    /// All recorded payments for an invoice, in arrival order.
    fn fetch_payments(
        &self,
        invoice_id: &InvoiceId,
    ) -> impl std::future::Future<Output = Result<Vec<Payment>, PaymentGatewayError>> + Send;

    fn insert_webhook_delivery(
        &self,
        delivery: &WebhookDelivery,
    ) -> impl std::future::Future<Output = Result<(), PaymentGatewayError>> + Send;
}
