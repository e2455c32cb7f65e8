//! Core value types shared across the crate.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of base units in one coin (10^24).
pub const COIN_PRECISION: u32 = 24;

/// A 32-byte identifier (block, contract, output, transaction, or change id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

pub type BlockId = Hash256;
pub type ChangeId = Hash256;
pub type ContractId = Hash256;
pub type OutputId = Hash256;
pub type TransactionId = Hash256;

impl Hash256 {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Hash256(bytes))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An amount of the native coin, denominated in base units (1 coin = 10^24
/// base units). Wraps a 128-bit unsigned integer; subtraction reports
/// underflow instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub const fn new(base_units: u128) -> Self {
        Currency(base_units)
    }

    /// Whole coins, i.e. `n * 10^24` base units.
    pub fn coins(n: u64) -> Self {
        Currency(n as u128 * 10u128.pow(COIN_PRECISION))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Subtraction that reports underflow: returns `(0, true)` when `other`
    /// exceeds `self`.
    pub fn sub_with_underflow(self, other: Currency) -> (Currency, bool) {
        match self.0.checked_sub(other.0) {
            Some(v) => (Currency(v), false),
            None => (Currency::ZERO, true),
        }
    }

    pub fn saturating_sub(self, other: Currency) -> Currency {
        Currency(self.0.saturating_sub(other.0))
    }

    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Currency(u128::from_le_bytes(bytes))
    }

    /// The value in whole coins as an exact decimal (base units / 10^24).
    pub fn to_decimal(self) -> BigDecimal {
        BigDecimal::new(BigInt::from(self.0), COIN_PRECISION as i64)
    }
}

impl Add for Currency {
    type Output = Currency;

    fn add(self, other: Currency) -> Currency {
        Currency(self.0 + other.0)
    }
}

impl AddAssign for Currency {
    fn add_assign(&mut self, other: Currency) {
        self.0 += other.0;
    }
}

impl Sum for Currency {
    fn sum<I: Iterator<Item = Currency>>(iter: I) -> Currency {
        iter.fold(Currency::ZERO, Add::add)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let v: u128 = s.parse().map_err(serde::de::Error::custom)?;
        Ok(Currency(v))
    }
}
