use alloy::primitives::Address;
use alloy::signers::{local::PrivateKeySigner, Signer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::UserAddress;
use crate::error::RelayError;
use crate::sign::recover_eip191;

/// Closed set of record kinds stored in the graph, replacing the
/// dynamic ("frozen") JSON shape the original store used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Balance,
    Deposit,
    Withdrawal,
    Batch,
    Deal,
    SharedLink,
    Reputation,
    Pulse,
    AuditCorrection,
}

/// A signed, immutable-by-convention entry in the graph store. The
/// payload is serialized canonically (stable field order, no
/// whitespace) before signing so that `verify` can recompute the same
/// bytes on read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedRecord<T> {
    pub kind: RecordKind,
    pub payload: T,
    pub signer: UserAddress,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

impl<T> SignedRecord<T>
where
    T: Serialize,
{
    fn canonical_bytes(kind: RecordKind, payload: &T) -> Result<Vec<u8>, RelayError> {
        let value = serde_json::json!({ "kind": kind, "payload": payload });
        serde_json::to_vec(&value)
            .map_err(|e| RelayError::InvalidInput(format!("unserializable payload: {e}")))
    }

    pub async fn sign(
        kind: RecordKind,
        payload: T,
        signer: &PrivateKeySigner,
    ) -> Result<Self, RelayError> {
        let bytes = Self::canonical_bytes(kind, &payload)?;
        let signature = signer
            .sign_message(&bytes)
            .await
            .map_err(|e| RelayError::Upstream(format!("signing failed: {e}")))?;
        Ok(SignedRecord {
            kind,
            payload,
            signer: UserAddress::from(signer.address()),
            signature: signature.to_string(),
            signed_at: Utc::now(),
        })
    }
}

impl<T> SignedRecord<T>
where
    T: Serialize + Clone,
{
    /// Verifies the signature against `expected_signer` and that the
    /// record's declared `kind` matches `expected_kind`. Returns the
    /// payload only on success, matching C3's `getVerified` contract.
    pub fn verify(&self, expected_kind: RecordKind, expected_signer: Address) -> Result<T, RelayError> {
        if self.kind != expected_kind {
            return Err(RelayError::InvalidInput(format!(
                "record kind mismatch: expected {expected_kind:?}, got {:?}",
                self.kind
            )));
        }
        let bytes = Self::canonical_bytes(self.kind, &self.payload)?;
        let recovered = recover_eip191(&bytes, &self.signature)?;
        if recovered != expected_signer || self.signer.inner() != expected_signer {
            return Err(RelayError::InvalidSignatures);
        }
        Ok(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
    struct Dummy {
        value: u64,
    }

    #[tokio::test]
    async fn sign_then_verify_round_trips() {
        let signer = PrivateKeySigner::random();
        let record = SignedRecord::sign(RecordKind::Balance, Dummy { value: 7 }, &signer)
            .await
            .unwrap();
        let verified = record.verify(RecordKind::Balance, signer.address()).unwrap();
        assert_eq!(verified, Dummy { value: 7 });
    }

    #[tokio::test]
    async fn verify_rejects_wrong_signer() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let record = SignedRecord::sign(RecordKind::Balance, Dummy { value: 7 }, &signer)
            .await
            .unwrap();
        assert!(record.verify(RecordKind::Balance, other.address()).is_err());
    }

    #[tokio::test]
    async fn verify_rejects_wrong_kind() {
        let signer = PrivateKeySigner::random();
        let record = SignedRecord::sign(RecordKind::Balance, Dummy { value: 7 }, &signer)
            .await
            .unwrap();
        assert!(record.verify(RecordKind::Deposit, signer.address()).is_err());
    }
}
