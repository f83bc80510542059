use npg_common::RawAmount;

use crate::{
    db_types::{BlockHash, NanoAddress, WalletState},
    traits::PaymentGatewayError,
};

/// A partial wallet-state update. Unset fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateWalletState {
    pub balance: Option<RawAmount>,
    pub frontier: Option<BlockHash>,
}

/// Storage for the per-account `{balance, frontier}` record.
///
/// This record is the single source of truth for "what block comes next" on an account chain. Callers must
/// serialise read-decide-write per account: the wallet reads the frontier, builds one block against it, and only
/// persists here after the node confirms the block. Two writers racing on the same account would fork the chain;
/// the gateway avoids that by giving every invoice its own derived account and settling each invoice sequentially.
pub trait WalletStateManagement: Clone {
    /// Load the state for an account, or the default `{balance: 0, frontier: None}` if none is stored yet.
    fn fetch_wallet_state(
        &self,
        account: &NanoAddress,
    ) -> impl std::future::Future<Output = Result<WalletState, PaymentGatewayError>> + Send;

    /// Merge and persist a partial update in a single atomic statement.
    fn update_wallet_state(
        &self,
        account: &NanoAddress,
        update: UpdateWalletState,
    ) -> impl std::future::Future<Output = Result<(), PaymentGatewayError>> + Send;
}
