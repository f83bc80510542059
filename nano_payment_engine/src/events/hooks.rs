use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    InvoiceExpiredEvent,
    InvoicePaidEvent,
    PaymentReceivedEvent,
};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_received_producers: Vec<EventProducer<PaymentReceivedEvent>>,
    pub invoice_paid_producers: Vec<EventProducer<InvoicePaidEvent>>,
    pub invoice_expired_producers: Vec<EventProducer<InvoiceExpiredEvent>>,
}

pub struct EventHandlers {
    pub on_payment_received: Option<EventHandler<PaymentReceivedEvent>>,
    pub on_invoice_paid: Option<EventHandler<InvoicePaidEvent>>,
    pub on_invoice_expired: Option<EventHandler<InvoiceExpiredEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_payment_received = hooks.on_payment_received.map(|f| EventHandler::new(buffer_size, f));
        let on_invoice_paid = hooks.on_invoice_paid.map(|f| EventHandler::new(buffer_size, f));
        let on_invoice_expired = hooks.on_invoice_expired.map(|f| EventHandler::new(buffer_size, f));
        Self { on_payment_received, on_invoice_paid, on_invoice_expired }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_received {
            result.payment_received_producers.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_invoice_paid {
            result.invoice_paid_producers.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_invoice_expired {
            result.invoice_expired_producers.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_received {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_invoice_paid {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_invoice_expired {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_received: Option<Handler<PaymentReceivedEvent>>,
    pub on_invoice_paid: Option<Handler<InvoicePaidEvent>>,
    pub on_invoice_expired: Option<Handler<InvoiceExpiredEvent>>,
}

impl EventHooks {
    pub fn on_payment_received<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentReceivedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_received = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_paid<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoicePaidEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_invoice_paid = Some(Arc::new(f));
        self
    }

    pub fn on_invoice_expired<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(InvoiceExpiredEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_invoice_expired = Some(Arc::new(f));
        self
    }
}
