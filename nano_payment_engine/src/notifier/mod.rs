mod hub;

pub use hub::{NotifierConfig, NotifierError, NotifierRegistry, PaymentNotifier, SessionEvent, StopReason};
