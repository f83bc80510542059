//! Proof-of-work validation for account-chain blocks.
//!
//! The network requires `blake2b-8(nonce_le ‖ root) ≥ threshold`, where the root is the account's frontier (or its
//! public key for the first block). Work servers are untrusted here: whatever they return is re-validated locally
//! before a block is submitted.

use std::{fmt::Display, str::FromStr};

use blake2::{digest::consts::U8, Blake2b, Digest};
use thiserror::Error;

use crate::{
    db_types::BlockHash,
    node::constants::{RECEIVE_DIFFICULTY, SEND_DIFFICULTY},
};

#[derive(Debug, Clone, Error)]
pub enum WorkError {
    #[error("Work nonce '{0}' is not a 16-character hex value")]
    InvalidNonce(String),
    #[error("Work root {0} is malformed. {1}")]
    InvalidRoot(BlockHash, String),
    #[error("Work {work} does not meet threshold {threshold}")]
    BelowThreshold { work: String, threshold: WorkThreshold },
}

//--------------------------------------    WorkThreshold     --------------------------------------------------------

/// A 64-bit work difficulty threshold, rendered as 16 hex characters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkThreshold(u64);

impl WorkThreshold {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for WorkThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for WorkThreshold {
    type Err = WorkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(WorkError::InvalidNonce(s.to_string()));
        }
        u64::from_str_radix(s, 16).map(Self).map_err(|_| WorkError::InvalidNonce(s.to_string()))
    }
}

//--------------------------------------      BlockClass      --------------------------------------------------------

/// The work class of a block. Receive-class work is much cheaper than send-class work, and the network rejects a
/// block whose work only meets the wrong class's threshold, so the class is fixed by the operation that builds the
/// block rather than passed around as a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Receive,
    Send,
}

impl BlockClass {
    pub fn threshold(&self) -> WorkThreshold {
        match self {
            BlockClass::Receive => WorkThreshold(RECEIVE_DIFFICULTY),
            BlockClass::Send => WorkThreshold(SEND_DIFFICULTY),
        }
    }
}

impl Display for BlockClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockClass::Receive => write!(f, "receive"),
            BlockClass::Send => write!(f, "send"),
        }
    }
}

/// Check a work nonce against a root and threshold. Returns the achieved difficulty on success.
pub fn validate_work(work: &str, root: &BlockHash, threshold: WorkThreshold) -> Result<u64, WorkError> {
    if work.len() != 16 {
        return Err(WorkError::InvalidNonce(work.to_string()));
    }
    let nonce = u64::from_str_radix(work, 16).map_err(|_| WorkError::InvalidNonce(work.to_string()))?;
    let root_bytes = root.to_bytes().map_err(|e| WorkError::InvalidRoot(root.clone(), e.to_string()))?;
    let mut hasher = Blake2b::<U8>::new();
    hasher.update(nonce.to_le_bytes());
    hasher.update(root_bytes);
    let digest: [u8; 8] = hasher.finalize().into();
    let achieved = u64::from_le_bytes(digest);
    if achieved >= threshold.0 {
        Ok(achieved)
    } else {
        Err(WorkError::BelowThreshold { work: work.to_string(), threshold })
    }
}
