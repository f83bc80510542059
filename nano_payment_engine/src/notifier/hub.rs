//! The per-invoice payment notification hub.
//!
//! Each open invoice gets a [`PaymentNotifier`] that buffers its recent payment events durably and fans them out to
//! live subscribers over bounded channels. The notifier has an explicit lifecycle: the settlement worker `start`s
//! it when listening begins and `stop`s it with a reason when the invoice reaches a terminal state, at which point
//! every session is closed and the persisted history purged. The notifier is fully reset, not merely quiesced.
//!
//! Subscribers that attach mid-stream first receive the persisted backlog (the most recent window, replayed
//! oldest-first) and then live events, so a page refresh never loses already-observed payments.

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::*;
use tokio::sync::{mpsc, watch, Mutex};

use crate::{
    db_types::{InvoiceId, Payment},
    traits::{NotifierManagement, PaymentGatewayError},
};

/// Default cap on concurrent subscriber sessions per invoice.
pub const MAX_SESSIONS_PER_NOTIFIER: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("The notifier for invoice {0} has not been started")]
    NotStarted(InvoiceId),
    #[error("Too many live sessions for invoice {0}")]
    TooManySessions(InvoiceId),
    #[error(transparent)]
    Database(#[from] PaymentGatewayError),
}

/// Why a notifier was stopped. Forwarded to subscribers as a close status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The invoice was paid in full.
    Paid,
    /// The payment deadline passed.
    Expired,
    /// The per-invoice payment cap was hit.
    TooManyPayments,
}

impl StopReason {
    /// The close status code delivered to subscribers. Paid is a normal close; the others use application codes.
    pub fn close_code(&self) -> u16 {
        match self {
            StopReason::Paid => 1000,
            StopReason::Expired => 4002,
            StopReason::TooManyPayments => 4003,
        }
    }
}

/// What a subscriber session receives.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Payment(Payment),
    Closed(StopReason),
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Hard cap on concurrent subscriber sessions per invoice. New connections beyond it are rejected, not queued.
    pub max_sessions: usize,
    /// How many recent payment events are kept for backlog replay. Matches the per-invoice payment cap.
    pub retention: usize,
    /// When set, a subscriber arriving before `start()` is held open this long waiting for the start instead of
    /// being rejected immediately.
    pub subscribe_grace: Option<Duration>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { max_sessions: MAX_SESSIONS_PER_NOTIFIER, retention: 10, subscribe_grace: None }
    }
}

pub struct PaymentNotifier<B> {
    invoice_id: InvoiceId,
    db: B,
    config: NotifierConfig,
    started: watch::Sender<bool>,
    sessions: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl<B: NotifierManagement> PaymentNotifier<B> {
    fn new(invoice_id: InvoiceId, db: B, config: NotifierConfig, started: bool) -> Self {
        let (started, _) = watch::channel(started);
        Self { invoice_id, db, config, started, sessions: Mutex::new(Vec::new()) }
    }

    pub fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Mark the notifier as accepting connections and persist that fact, releasing any waiting subscribers.
    pub async fn start(&self) -> Result<(), NotifierError> {
        self.db.set_notifier_started(&self.invoice_id, true).await?;
        let _ = self.started.send(true);
        debug!("📣️ Notifier for invoice {} started", self.invoice_id);
        Ok(())
    }

    /// Close every session with the given reason, clear the subscriber set and purge persisted history.
    pub async fn stop(&self, reason: StopReason) -> Result<(), NotifierError> {
        {
            let mut sessions = self.sessions.lock().await;
            for session in sessions.drain(..) {
                let _ = session.try_send(SessionEvent::Closed(reason));
            }
        }
        self.db.purge_notifier(&self.invoice_id).await?;
        let _ = self.started.send(false);
        info!("📣️ Notifier for invoice {} stopped ({reason:?}, code {})", self.invoice_id, reason.close_code());
        Ok(())
    }

    /// Persist a payment event (bounded retention) and broadcast it to every live session. A session that cannot
    /// accept the event is pruned; the broadcast continues to the others.
    pub async fn notify(&self, payment: &Payment) -> Result<(), NotifierError> {
        self.db.store_notifier_event(&self.invoice_id, payment, self.config.retention).await?;
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|session| session.try_send(SessionEvent::Payment(payment.clone())).is_ok());
        let dropped = before - sessions.len();
        if dropped > 0 {
            debug!("📣️ Dropped {dropped} dead sessions for invoice {}", self.invoice_id);
        }
        Ok(())
    }

    /// Attach a subscriber. Before `start()` the connection is rejected (or held, when a grace period is
    /// configured); at the session cap it is rejected outright. The returned channel is pre-seeded with the
    /// persisted backlog, oldest first, followed by live events as they arrive.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<SessionEvent>, NotifierError> {
        if !self.is_started() {
            match self.config.subscribe_grace {
                None => return Err(NotifierError::NotStarted(self.invoice_id.clone())),
                Some(grace) => self.wait_for_start(grace).await?,
            }
        }
        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.config.max_sessions {
            return Err(NotifierError::TooManySessions(self.invoice_id.clone()));
        }
        // Capacity covers the full backlog plus a burst of live events; a subscriber that cannot keep up is
        // pruned on the next notify rather than back-pressuring the settlement flow.
        let (tx, rx) = mpsc::channel(self.config.retention + MAX_SESSIONS_PER_NOTIFIER);
        let backlog = self.db.fetch_notifier_backlog(&self.invoice_id, self.config.retention).await?;
        for payment in backlog {
            let _ = tx.try_send(SessionEvent::Payment(payment));
        }
        sessions.push(tx);
        debug!("📣️ Invoice {} now has {} sessions", self.invoice_id, sessions.len());
        Ok(rx)
    }

    async fn wait_for_start(&self, grace: Duration) -> Result<(), NotifierError> {
        let mut rx = self.started.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        match tokio::time::timeout(grace, wait).await {
            Ok(true) => Ok(()),
            _ => Err(NotifierError::NotStarted(self.invoice_id.clone())),
        }
    }
}

//--------------------------------------   NotifierRegistry   --------------------------------------------------------

/// Hands out the notifier for an invoice, creating it on first use. Mirrors a durable-object namespace: the
/// invoice id is the name, and a notifier's persisted started-flag survives the in-memory instance.
pub struct NotifierRegistry<B> {
    db: B,
    config: NotifierConfig,
    inner: Arc<Mutex<HashMap<InvoiceId, Arc<PaymentNotifier<B>>>>>,
}

impl<B> Clone for NotifierRegistry<B>
where B: Clone
{
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), config: self.config.clone(), inner: Arc::clone(&self.inner) }
    }
}

impl<B: NotifierManagement> NotifierRegistry<B> {
    pub fn new(db: B, config: NotifierConfig) -> Self {
        Self { db, config, inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub async fn get(&self, invoice_id: &InvoiceId) -> Result<Arc<PaymentNotifier<B>>, NotifierError> {
        let mut map = self.inner.lock().await;
        if let Some(notifier) = map.get(invoice_id) {
            return Ok(Arc::clone(notifier));
        }
        let started = self.db.notifier_started(invoice_id).await?;
        let notifier =
            Arc::new(PaymentNotifier::new(invoice_id.clone(), self.db.clone(), self.config.clone(), started));
        map.insert(invoice_id.clone(), Arc::clone(&notifier));
        Ok(notifier)
    }

    /// Drop the in-memory instance for an invoice that has reached a terminal state. Persisted state is already
    /// purged by `stop`.
    pub async fn remove(&self, invoice_id: &InvoiceId) {
        self.inner.lock().await.remove(invoice_id);
    }
}
