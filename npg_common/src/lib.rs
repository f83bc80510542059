mod amount;
mod secret;

pub mod helpers;

pub use amount::{AmountConversionError, NanoAmount, RawAmount, MICRO_NANO_PER_NANO, RAW_PER_MICRO_NANO};
pub use secret::Secret;

pub const NANO_CURRENCY_CODE: &str = "XNO";
pub const NANO_CURRENCY_CODE_LOWER: &str = "xno";
