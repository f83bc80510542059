//! Nano Payment Engine
//!
//! The engine behind the nano payment gateway: it watches the node's confirmation stream for payments into
//! per-invoice receive accounts, drives each invoice's settlement state machine, fans state out through a staged
//! at-least-once pipeline, and performs the on-chain receive + sweep once an invoice is paid in full.
//!
//! The library is organised around a few seams:
//! 1. Database backends implement the traits in [`mod@traits`]; [`SqliteDatabase`] is the provided backend. The
//!    typed records they exchange live in [`mod@db_types`].
//! 2. Node access lives in [`mod@node`]: the websocket subscription client, the pooled RPC client with ordered
//!    endpoint fallback, and the account-chain wallet.
//! 3. The moving parts ([`mod@settlement`], [`mod@notifier`] and [`mod@pipeline`]) are wired together by the
//!    server crate, which owns configuration and process startup.
//!
//! Lifecycle events (payment received, invoice paid, invoice expired) are exposed through a small hook system in
//! [`mod@events`]; subscribe to them to bolt on custom behaviour without touching the settlement flow.
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod node;
pub mod notifier;
pub mod pipeline;
pub mod settlement;
#[cfg(feature = "sqlite")]
mod sqlite;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    InsertPaymentResult,
    InvoiceManagement,
    NotifierManagement,
    PaymentGatewayDatabase,
    PaymentGatewayError,
    WalletStateManagement,
};
