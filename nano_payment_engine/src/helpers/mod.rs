mod ids;
mod keys;

pub use ids::generate_invoice_id;
pub use keys::{check_address, derive_secret_key, encode_address, AccountKeys, AddressError, KeyError};
