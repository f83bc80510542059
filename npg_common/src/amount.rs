use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

/// 1 nano = 10^6 micro-nano. Amounts are stored and summed in micro-nano, so six
/// decimal places is the finest granularity the gateway tracks.
pub const MICRO_NANO_PER_NANO: i64 = 1_000_000;

/// 1 micro-nano = 10^24 raw. The ledger itself counts in raw.
pub const RAW_PER_MICRO_NANO: u128 = 1_000_000_000_000_000_000_000_000;

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a nano amount: {0}")]
pub struct AmountConversionError(pub String);

//--------------------------------------     NanoAmount       --------------------------------------------------------

/// An amount of nano in micro-nano (10^-6 XNO) units.
///
/// This is the unit used for invoice prices and cumulative payment totals. Raw ledger amounts are converted with
/// [`RawAmount::to_nano`], which truncates anything below the sixth decimal rather than rounding it up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct NanoAmount(i64);

impl NanoAmount {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_micro(micro: i64) -> Self {
        Self(micro)
    }

    /// Convert a decimal XNO value (as received over the API) into micro-nano, truncating below 6 decimals.
    pub fn from_nano(nano: f64) -> Result<Self, AmountConversionError> {
        if !nano.is_finite() || nano < 0.0 {
            return Err(AmountConversionError(format!("{nano} is not a valid amount")));
        }
        let micro = nano * MICRO_NANO_PER_NANO as f64;
        if micro >= i64::MAX as f64 {
            return Err(AmountConversionError(format!("{nano} XNO is too large")));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self(micro.trunc() as i64))
    }

    pub fn as_nano(&self) -> f64 {
        self.0 as f64 / MICRO_NANO_PER_NANO as f64
    }
}

impl From<i64> for NanoAmount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Add for NanoAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for NanoAmount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for NanoAmount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Sum for NanoAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl Display for NanoAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nano = self.0 as f64 / MICRO_NANO_PER_NANO as f64;
        write!(f, "{nano:0.6}Ӿ")
    }
}

//--------------------------------------      RawAmount       --------------------------------------------------------

/// An amount in raw, the ledger's indivisible unit.
///
/// Raw values routinely exceed 64 bits, so they travel as strings on the wire and in the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RawAmount(u128);

impl RawAmount {
    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Truncating conversion to micro-nano. Anything below the sixth decimal place is dropped, never rounded up,
    /// so a dust transfer cannot be inflated past the minimum-amount filter.
    pub fn to_nano(&self) -> Result<NanoAmount, AmountConversionError> {
        let micro = self.0 / RAW_PER_MICRO_NANO;
        let micro = i64::try_from(micro)
            .map_err(|_| AmountConversionError(format!("{} raw cannot be represented in micro-nano", self.0)))?;
        Ok(NanoAmount::from_micro(micro))
    }

    /// The big-endian 16-byte representation used when hashing state blocks.
    pub fn to_be_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl From<u128> for RawAmount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl FromStr for RawAmount {
    type Err = AmountConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().parse::<u128>().map_err(|e| AmountConversionError(format!("{s}: {e}")))?;
        Ok(Self(value))
    }
}

impl TryFrom<String> for RawAmount {
    type Error = AmountConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RawAmount> for String {
    fn from(value: RawAmount) -> Self {
        value.0.to_string()
    }
}

impl Display for RawAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raw_to_nano_truncates() {
        // 1.9999999... XNO in raw truncates to 1.999999 XNO
        let raw: RawAmount = "1999999999999999999999999999999".parse().unwrap();
        assert_eq!(raw.to_nano().unwrap(), NanoAmount::from_micro(1_999_999));
        // below one micro-nano truncates to zero
        let dust: RawAmount = "999999999999999999999999".parse().unwrap();
        assert_eq!(dust.to_nano().unwrap(), NanoAmount::from_micro(0));
    }

    #[test]
    fn nano_amount_sums() {
        let total: NanoAmount = [400_000i64, 400_000, 300_000].into_iter().map(NanoAmount::from).sum();
        assert_eq!(total, NanoAmount::from(1_100_000));
        assert!(total >= NanoAmount::from_nano(1.0).unwrap());
    }

    #[test]
    fn from_nano_truncates_excess_decimals() {
        let amount = NanoAmount::from_nano(0.1234567).unwrap();
        assert_eq!(amount.value(), 123_456);
    }

    #[test]
    fn raw_round_trips_through_strings() {
        let raw: RawAmount = "340282366920938463463374607431768211455".parse().unwrap();
        assert_eq!(String::from(raw), "340282366920938463463374607431768211455");
        assert!("not-a-number".parse::<RawAmount>().is_err());
        assert!("-5".parse::<RawAmount>().is_err());
    }
}
