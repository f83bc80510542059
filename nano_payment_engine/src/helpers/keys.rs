//! Hot-wallet key derivation and account address encoding.
//!
//! Every invoice gets its own receive account, derived from the hot wallet seed and the invoice's chain index:
//! `secret = blake2b-256(seed ‖ index_be32)`. The public key and signatures use ed25519, and addresses carry a
//! 5-byte blake2b checksum so a mistyped recipient address is caught before any block is built against it.

use blake2::{
    digest::consts::{U32, U5},
    Blake2b,
    Digest,
};
use ed25519_dalek::{Signer, SigningKey};
use thiserror::Error;

use crate::db_types::NanoAddress;

/// The base32 alphabet used by nano account addresses. Deliberately omits 0, 2, l and v.
const ADDRESS_ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

const ADDRESS_PREFIX: &str = "nano_";
/// 52 base32 characters encode the 4-bit pad plus the 256-bit public key.
const ENCODED_KEY_LENGTH: usize = 52;
/// 8 base32 characters encode the 40-bit checksum.
const ENCODED_CHECKSUM_LENGTH: usize = 8;

#[derive(Debug, Clone, Error)]
pub enum KeyError {
    #[error("The wallet seed must be 64 hex characters. {0}")]
    InvalidSeed(String),
}

#[derive(Debug, Clone, Error)]
pub enum AddressError {
    #[error("Address does not start with '{ADDRESS_PREFIX}'")]
    MissingPrefix,
    #[error("Address body must be {n} characters, got {got}", n = ENCODED_KEY_LENGTH + ENCODED_CHECKSUM_LENGTH)]
    WrongLength { got: usize },
    #[error("Address contains a character outside the nano base32 alphabet")]
    InvalidCharacter,
    #[error("Address checksum does not match its public key")]
    ChecksumMismatch,
}

/// Derive the secret key for the receive account at `index` under the given hex-encoded 32-byte seed.
pub fn derive_secret_key(seed_hex: &str, index: u32) -> Result<[u8; 32], KeyError> {
    let seed = hex::decode(seed_hex.trim()).map_err(|e| KeyError::InvalidSeed(e.to_string()))?;
    let seed: [u8; 32] =
        seed.try_into().map_err(|v: Vec<u8>| KeyError::InvalidSeed(format!("{} bytes", v.len())))?;
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(seed);
    hasher.update(index.to_be_bytes());
    Ok(hasher.finalize().into())
}

/// The key material for one derived receive account.
pub struct AccountKeys {
    signing_key: SigningKey,
    public: [u8; 32],
    address: NanoAddress,
}

impl AccountKeys {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let public = signing_key.verifying_key().to_bytes();
        let address = encode_address(&public);
        Self { signing_key, public, address }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn address(&self) -> &NanoAddress {
        &self.address
    }

    /// Sign a 32-byte block hash, returning the 128-character uppercase hex signature the node expects.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode_upper(self.signing_key.sign(message).to_bytes())
    }
}

/// Encode a public key as a `nano_…` address with its checksum.
pub fn encode_address(public_key: &[u8; 32]) -> NanoAddress {
    let checksum = address_checksum(public_key);
    let mut address = String::with_capacity(ADDRESS_PREFIX.len() + ENCODED_KEY_LENGTH + ENCODED_CHECKSUM_LENGTH);
    address.push_str(ADDRESS_PREFIX);
    address.push_str(&encode_base32(public_key, 4));
    address.push_str(&encode_base32(&checksum, 0));
    NanoAddress(address)
}

/// Validate an address (prefix, alphabet, checksum) and return its public key.
pub fn check_address(address: &NanoAddress) -> Result<[u8; 32], AddressError> {
    let body = address.as_str().strip_prefix(ADDRESS_PREFIX).ok_or(AddressError::MissingPrefix)?;
    if body.len() != ENCODED_KEY_LENGTH + ENCODED_CHECKSUM_LENGTH {
        return Err(AddressError::WrongLength { got: body.len() });
    }
    let (key_part, checksum_part) = body.split_at(ENCODED_KEY_LENGTH);
    let key_bytes = decode_base32(key_part, 4)?;
    let checksum_bytes = decode_base32(checksum_part, 0)?;
    let public_key: [u8; 32] = key_bytes.try_into().map_err(|_| AddressError::InvalidCharacter)?;
    if address_checksum(&public_key)[..] != checksum_bytes[..] {
        return Err(AddressError::ChecksumMismatch);
    }
    Ok(public_key)
}

/// blake2b-5 of the public key, reversed, as nano defines it.
fn address_checksum(public_key: &[u8; 32]) -> [u8; 5] {
    let digest = Blake2b::<U5>::digest(public_key);
    let mut checksum = [0u8; 5];
    for (i, byte) in digest.iter().rev().enumerate() {
        checksum[i] = *byte;
    }
    checksum
}

/// Encode bytes into the nano base32 alphabet, with `pad_bits` implicit zero bits prepended so the total bit count
/// is a multiple of five.
fn encode_base32(data: &[u8], pad_bits: u32) -> String {
    debug_assert_eq!((data.len() * 8 + pad_bits as usize) % 5, 0);
    let mut out = String::with_capacity((data.len() * 8 + pad_bits as usize) / 5);
    let mut acc: u32 = 0;
    let mut bits: u32 = pad_bits;
    for &byte in data {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = ((acc >> bits) & 0x1f) as usize;
            out.push(ADDRESS_ALPHABET[index] as char);
            acc &= (1 << bits) - 1;
        }
    }
    out
}

fn decode_base32(encoded: &str, pad_bits: u32) -> Result<Vec<u8>, AddressError> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for (i, c) in encoded.bytes().enumerate() {
        let value = ADDRESS_ALPHABET.iter().position(|&a| a == c).ok_or(AddressError::InvalidCharacter)? as u32;
        if i == 0 && pad_bits > 0 {
            // The pad bits must be zero, and are not part of the output.
            if value >> (5 - pad_bits) != 0 {
                return Err(AddressError::InvalidCharacter);
            }
            acc = value & ((1 << (5 - pad_bits)) - 1);
            bits = 5 - pad_bits;
            continue;
        }
        acc = (acc << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xff) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    Ok(out)
}
