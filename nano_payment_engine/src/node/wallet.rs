//! The account-chain wallet: builds, signs and submits state blocks for one derived receive account.
//!
//! Every mutation follows the same sequence: read the stored frontier, build exactly one block against it, obtain
//! and validate proof-of-work, submit, check the node's hash echo, and only then persist the new frontier and
//! balance. Settlement for an invoice runs these steps sequentially (receive blocks in payment order, then one
//! send), so a single wallet instance never races itself; distinct invoices use distinct derived accounts and are
//! free to settle in parallel.

use blake2::{digest::consts::U32, Blake2b, Digest};
use log::*;
use npg_common::{RawAmount, Secret};
use serde::Serialize;

use crate::{
    db_types::{BlockHash, ConversionError, NanoAddress, WalletState},
    helpers::{check_address, derive_secret_key, AccountKeys, AddressError, KeyError},
    node::{
        rpc::{NodeClientError, NodeRpcClient},
        work::BlockClass,
    },
    traits::{PaymentGatewayError, UpdateWalletState, WalletStateManagement},
};

/// The state-block preamble: 31 zero bytes followed by 0x06.
const BLOCK_PREAMBLE: [u8; 32] =
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 6];

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error(transparent)]
    Rpc(#[from] NodeClientError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("Invalid account address: {0}")]
    Address(#[from] AddressError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Could not load or store wallet state: {0}")]
    Database(#[from] PaymentGatewayError),
    #[error("The account has no frontier; nothing to send")]
    NoFrontier,
    #[error("Balance overflow while receiving {0} raw")]
    BalanceOverflow(RawAmount),
}

/// A signed state block in the node's JSON representation.
#[derive(Debug, Clone, Serialize)]
pub struct StateBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub account: NanoAddress,
    /// 64 hex characters; the zero hash for an account's first block.
    pub previous: String,
    pub representative: NanoAddress,
    /// Raw balance after this block, as a decimal string.
    pub balance: String,
    pub link: String,
    pub signature: String,
    pub work: String,
}

pub struct NanoWallet<B> {
    keys: AccountKeys,
    representative: NanoAddress,
    representative_key: [u8; 32],
    rpc: NodeRpcClient,
    store: B,
    state: WalletState,
}

impl<B: WalletStateManagement> NanoWallet<B> {
    pub fn new(
        secret: [u8; 32],
        representative: NanoAddress,
        rpc: NodeRpcClient,
        store: B,
    ) -> Result<Self, WalletError> {
        let representative_key = check_address(&representative)?;
        let keys = AccountKeys::from_secret(secret);
        Ok(Self { keys, representative, representative_key, rpc, store, state: WalletState::default() })
    }

    pub fn account(&self) -> &NanoAddress {
        self.keys.address()
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    /// Load the persisted balance and frontier for this account, defaulting to an empty chain.
    pub async fn init(&mut self) -> Result<(), WalletError> {
        self.state = self.store.fetch_wallet_state(self.keys.address()).await?;
        debug!(
            "👛️ Wallet {} initialised: balance {} raw, frontier {:?}",
            self.keys.address(),
            self.state.balance,
            self.state.frontier
        );
        Ok(())
    }

    /// Pocket a pending send block. `link` is the hash of the incoming send; `amount` its raw value. Returns the
    /// hash of the new receive block, which becomes the account's frontier.
    pub async fn receive(&mut self, link: &BlockHash, amount: RawAmount) -> Result<BlockHash, WalletError> {
        let new_balance =
            self.state.balance.checked_add(amount).ok_or(WalletError::BalanceOverflow(amount))?;
        let link_bytes = link.to_bytes()?;
        let (mut block, hash) = self.build_block(new_balance, link_bytes)?;
        let work_root = self.work_root();
        block.work = self.rpc.work_generate(&work_root, BlockClass::Receive.threshold()).await?;
        self.rpc.process(&block, &hash).await?;
        self.commit(new_balance, hash.clone()).await?;
        info!("👛️ Received {amount} raw into {} (block {hash})", self.keys.address());
        Ok(hash)
    }

    /// Forward the account's entire balance to `destination`. Returns the hash of the send block.
    pub async fn send_all(&mut self, destination: &NanoAddress) -> Result<BlockHash, WalletError> {
        let previous = self.state.frontier.clone().ok_or(WalletError::NoFrontier)?;
        let link_bytes = check_address(destination)?;
        let (mut block, hash) = self.build_block(RawAmount::zero(), link_bytes)?;
        block.work = self.rpc.work_generate(&previous, BlockClass::Send.threshold()).await?;
        self.rpc.process(&block, &hash).await?;
        self.commit(RawAmount::zero(), hash.clone()).await?;
        info!("👛️ Swept {} to {destination} (block {hash})", self.keys.address());
        Ok(hash)
    }

    /// The root the proof-of-work must cover: the frontier, or the account's public key before the first block.
    fn work_root(&self) -> BlockHash {
        match &self.state.frontier {
            Some(frontier) => frontier.clone(),
            None => BlockHash::from_bytes(self.keys.public_key()),
        }
    }

    fn build_block(&self, balance: RawAmount, link: [u8; 32]) -> Result<(StateBlock, BlockHash), WalletError> {
        let previous_bytes = match &self.state.frontier {
            Some(frontier) => frontier.to_bytes()?,
            None => [0u8; 32],
        };
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(BLOCK_PREAMBLE);
        hasher.update(self.keys.public_key());
        hasher.update(previous_bytes);
        hasher.update(self.representative_key);
        hasher.update(balance.to_be_bytes());
        hasher.update(link);
        let hash_bytes: [u8; 32] = hasher.finalize().into();
        let hash = BlockHash::from_bytes(&hash_bytes);
        let signature = self.keys.sign(&hash_bytes);
        let block = StateBlock {
            block_type: "state".into(),
            account: self.keys.address().clone(),
            previous: hex::encode_upper(previous_bytes),
            representative: self.representative.clone(),
            balance: balance.to_string(),
            link: hex::encode_upper(link),
            signature,
            work: String::new(),
        };
        Ok((block, hash))
    }

    /// Persist the post-block state. Runs only after the node has confirmed the block, so a crash between
    /// submission and here can at worst cause a (detectable) fork error on the next attempt, never a silent one.
    async fn commit(&mut self, balance: RawAmount, frontier: BlockHash) -> Result<(), WalletError> {
        let update = UpdateWalletState { balance: Some(balance), frontier: Some(frontier.clone()) };
        self.store.update_wallet_state(self.keys.address(), update).await?;
        self.state = WalletState { balance, frontier: Some(frontier) };
        Ok(())
    }
}

//--------------------------------------    WalletFactory     --------------------------------------------------------

/// Derives per-invoice wallets from the hot wallet seed. One factory is shared by the on-chain pipeline stages.
#[derive(Clone)]
pub struct WalletFactory {
    seed: Secret<String>,
    representative: NanoAddress,
    rpc: NodeRpcClient,
}

impl WalletFactory {
    pub fn new(seed: Secret<String>, representative: NanoAddress, rpc: NodeRpcClient) -> Result<Self, WalletError> {
        // Fail fast on a bad representative rather than at first settlement.
        check_address(&representative)?;
        Ok(Self { seed, representative, rpc })
    }

    pub fn wallet_for_index<B: WalletStateManagement>(
        &self,
        index: u32,
        store: B,
    ) -> Result<NanoWallet<B>, WalletError> {
        let secret = derive_secret_key(self.seed.reveal(), index)?;
        NanoWallet::new(secret, self.representative.clone(), self.rpc.clone(), store)
    }

    /// The receive address for the given derivation index, as used during invoice creation.
    pub fn address_for_index(&self, index: u32) -> Result<NanoAddress, WalletError> {
        let secret = derive_secret_key(self.seed.reveal(), index)?;
        Ok(AccountKeys::from_secret(secret).address().clone())
    }
}
