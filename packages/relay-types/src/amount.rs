use std::fmt;
use std::str::FromStr;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// A non-negative, arbitrary-precision amount in the base unit of its
/// asset (wei for the bridge, USDC atomic 10^6 units for deals).
/// `U256` is unsigned so the non-negativity invariant is enforced by
/// the type itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256::ZERO);

    pub fn from_u256(value: U256) -> Self {
        Amount(value)
    }

    pub fn from_decimal(s: &str) -> Result<Self, RelayError> {
        U256::from_str(s.trim())
            .map(Amount)
            .map_err(|_| RelayError::InvalidInput(format!("malformed amount: {s}")))
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl TryFrom<String> for Amount {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_decimal(&value)
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_amount_is_zero() {
        assert!(Amount::ZERO.is_zero());
    }

    #[test]
    fn checked_sub_refuses_underflow() {
        let a = Amount::from_decimal("5").unwrap();
        let b = Amount::from_decimal("10").unwrap();
        assert!(a.checked_sub(b).is_none());
    }

    #[test]
    fn round_trips_through_decimal_string() {
        let a = Amount::from_decimal("1000000000000000000").unwrap();
        assert_eq!(a.to_string(), "1000000000000000000");
    }

    #[test]
    fn rejects_negative_or_malformed() {
        assert!(Amount::from_decimal("-1").is_err());
        assert!(Amount::from_decimal("abc").is_err());
    }
}
