use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// A canonical 20-byte Ethereum address. Equality and hashing are always
/// performed on the lowercase-hex form, so `UserAddress` can be used
/// directly as a map key without callers normalizing case themselves.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserAddress(Address);

impl UserAddress {
    pub fn from_hex(s: &str) -> Result<Self, RelayError> {
        Address::from_str(s.trim())
            .map(UserAddress)
            .map_err(|_| RelayError::InvalidInput(format!("malformed address: {s}")))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_string().to_lowercase()
    }

    pub fn inner(&self) -> Address {
        self.0
    }
}

impl fmt::Display for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserAddress({})", self.to_hex())
    }
}

impl TryFrom<String> for UserAddress {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<UserAddress> for String {
    fn from(value: UserAddress) -> Self {
        value.to_hex()
    }
}

impl From<Address> for UserAddress {
    fn from(value: Address) -> Self {
        UserAddress(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let a = UserAddress::from_hex("0x70997970C51812dc3A010C7d01b50e0d17dc79C8").unwrap();
        assert_eq!(a.to_hex(), "0x70997970c51812dc3a010c7d01b50e0d17dc79c8");
    }

    #[test]
    fn equality_is_case_insensitive() {
        let a = UserAddress::from_hex("0x70997970C51812dc3A010C7d01b50e0d17dc79C8").unwrap();
        let b = UserAddress::from_hex("0x70997970c51812dc3a010c7d01b50e0d17dc79c8").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(UserAddress::from_hex("not-an-address").is_err());
    }
}
