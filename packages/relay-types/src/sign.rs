//! EIP-191 signature recovery used by the dual-signature policy for
//! value-moving ledger operations (withdrawals, transfers): the caller
//! supplies a message together with a signature by the user's wallet
//! and a signature by the user's key in the signed-store, and both must
//! recover to the same address.

use alloy::primitives::{Address, Signature};

use crate::address::UserAddress;
use crate::error::RelayError;

/// Recovers the signing address from an EIP-191 personal-sign signature
/// over `message`.
pub fn recover_eip191(message: &[u8], signature_hex: &str) -> Result<Address, RelayError> {
    let sig_bytes = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|_| RelayError::InvalidInput("malformed signature hex".into()))?;
    let signature = Signature::try_from(sig_bytes.as_slice())
        .map_err(|_| RelayError::InvalidInput("malformed signature".into()))?;
    signature
        .recover_address_from_msg(message)
        .map_err(|_| RelayError::InvalidSignatures)
}

/// Verifies the dual-signature policy: both signatures must recover to
/// the same address, and that address must equal `claimed_user`.
pub fn verify_dual_signature(
    message: &[u8],
    wallet_signature_hex: &str,
    store_signature_hex: &str,
    claimed_user: UserAddress,
) -> Result<(), RelayError> {
    let wallet_addr = recover_eip191(message, wallet_signature_hex)?;
    let store_addr = recover_eip191(message, store_signature_hex)?;
    if wallet_addr != store_addr || UserAddress::from(wallet_addr) != claimed_user {
        return Err(RelayError::InvalidSignatures);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    #[test]
    fn recovers_matching_address_for_valid_signature() {
        let signer = PrivateKeySigner::random();
        let expected = signer.address();
        let message = b"withdraw 1 ether nonce 1";
        let signature = signer.sign_message_sync(message).unwrap();
        let recovered = recover_eip191(message, &signature.to_string()).unwrap();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn dual_signature_fails_when_signers_disagree() {
        let signer_a = PrivateKeySigner::random();
        let signer_b = PrivateKeySigner::random();
        let message = b"withdraw 1 ether nonce 1";
        let sig_a = signer_a.sign_message_sync(message).unwrap();
        let sig_b = signer_b.sign_message_sync(message).unwrap();
        let result = verify_dual_signature(
            message,
            &sig_a.to_string(),
            &sig_b.to_string(),
            UserAddress::from(signer_a.address()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn dual_signature_succeeds_when_both_match_claimed_user() {
        let signer = PrivateKeySigner::random();
        let message = b"withdraw 1 ether nonce 1";
        let sig = signer.sign_message_sync(message).unwrap();
        let result = verify_dual_signature(
            message,
            &sig.to_string(),
            &sig.to_string(),
            UserAddress::from(signer.address()),
        );
        assert!(result.is_ok());
    }
}
