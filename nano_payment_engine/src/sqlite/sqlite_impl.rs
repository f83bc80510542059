//! `SqliteDatabase` is the concrete SQLite backend for the payment gateway. It implements all the traits in the
//! [`crate::traits`] module; nothing outside this module issues SQL.
use std::fmt::Debug;

use sqlx::SqlitePool;

use super::db::{invoices, new_pool, notifier, payments, services, wallet_state, webhook_deliveries};
use crate::{
    db_types::{
        Invoice,
        InvoiceId,
        InvoiceStatus,
        NanoAddress,
        NewInvoice,
        Payment,
        Service,
        WalletState,
        Webhook,
        WebhookDelivery,
    },
    traits::{
        InsertPaymentResult,
        InvoiceManagement,
        NotifierManagement,
        PaymentGatewayDatabase,
        PaymentGatewayError,
        UpdateWalletState,
        WalletStateManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Note: the connection pool is initialized lazily. The first call to the database will establish the pool.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.pool.close().await;
        Ok(())
    }
}

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }
}

impl InvoiceManagement for SqliteDatabase {
    async fn insert_invoice(&self, invoice: NewInvoice) -> Result<Invoice, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        invoices::insert_invoice(invoice, &mut conn).await
    }

    async fn set_pay_address(&self, id: &InvoiceId, address: &NanoAddress) -> Result<Invoice, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        invoices::set_pay_address(id, address, &mut conn).await
    }

    async fn fetch_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        invoices::fetch_invoice(id, &mut conn).await
    }

    async fn update_invoice_status(
        &self,
        id: &InvoiceId,
        status: InvoiceStatus,
    ) -> Result<Invoice, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        invoices::update_status(id, status, &mut conn).await
    }

    async fn fetch_service(&self, service_id: &str) -> Result<Option<Service>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        services::fetch_service(service_id, &mut conn).await
    }

    async fn fetch_webhooks(&self, service_id: &str) -> Result<Vec<Webhook>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        services::fetch_webhooks(service_id, &mut conn).await
    }

    async fn insert_payment(
        &self,
        invoice_id: &InvoiceId,
        payment: &Payment,
    ) -> Result<InsertPaymentResult, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::idempotent_insert(invoice_id, payment, &mut conn).await
    }

    async fn fetch_payments(&self, invoice_id: &InvoiceId) -> Result<Vec<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payments(invoice_id, &mut conn).await
    }

    async fn insert_webhook_delivery(&self, delivery: &WebhookDelivery) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        webhook_deliveries::insert_delivery(delivery, &mut conn).await
    }
}

impl WalletStateManagement for SqliteDatabase {
    async fn fetch_wallet_state(&self, account: &NanoAddress) -> Result<WalletState, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        wallet_state::fetch_state(account, &mut conn).await
    }

    async fn update_wallet_state(
        &self,
        account: &NanoAddress,
        update: UpdateWalletState,
    ) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        wallet_state::update_state(account, update, &mut conn).await
    }
}

impl NotifierManagement for SqliteDatabase {
    async fn set_notifier_started(&self, invoice_id: &InvoiceId, started: bool) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifier::set_started(invoice_id, started, &mut conn).await
    }

    async fn notifier_started(&self, invoice_id: &InvoiceId) -> Result<bool, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifier::is_started(invoice_id, &mut conn).await
    }

    async fn store_notifier_event(
        &self,
        invoice_id: &InvoiceId,
        payment: &Payment,
        retention: usize,
    ) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifier::store_event(invoice_id, payment, retention, &mut conn).await
    }

    async fn fetch_notifier_backlog(
        &self,
        invoice_id: &InvoiceId,
        limit: usize,
    ) -> Result<Vec<Payment>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifier::fetch_backlog(invoice_id, limit, &mut conn).await
    }

    async fn purge_notifier(&self, invoice_id: &InvoiceId) -> Result<(), PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        notifier::purge(invoice_id, &mut conn).await
    }
}
