mod worker;

pub use worker::{SettlementConfig, SettlementError, SettlementHandle, SettlementWorker};
