//! Shared primitives used across the relay: addresses, amounts, nonces,
//! the signed-record envelope, the error taxonomy, and retry/backoff.

pub mod address;
pub mod amount;
pub mod cache;
pub mod error;
pub mod hash;
pub mod nonce;
pub mod record;
pub mod retry;
pub mod sign;

pub use address::UserAddress;
pub use amount::Amount;
pub use error::RelayError;
pub use hash::keccak256;
pub use nonce::Nonce;
pub use record::{RecordKind, SignedRecord};
