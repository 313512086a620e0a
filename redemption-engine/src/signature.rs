//! Customer approval signature verification
//!
//! Wallet addresses are hex-encoded ed25519 verifying keys; approvals are
//! ed25519 signatures over the session's canonical signing message.

use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};

/// Verify a hex-encoded signature over `message` against a wallet address
///
/// Returns false for malformed input rather than erroring: a garbled
/// signature is just an invalid one.
pub fn verify_signature(message: &[u8], signature_hex: &str, customer_address: &str) -> bool {
    let sig_bytes = match hex::decode(signature_hex.trim_start_matches("0x")) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let sig_array: [u8; 64] = match sig_bytes.try_into() {
        Ok(array) => array,
        Err(_) => return false,
    };
    let signature = DalekSignature::from_bytes(&sig_array);

    let key_bytes = match hex::decode(customer_address.trim_start_matches("0x")) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let key_array: [u8; 32] = match key_bytes.try_into() {
        Ok(array) => array,
        Err(_) => return false,
    };
    let verifying_key = match VerifyingKey::from_bytes(&key_array) {
        Ok(key) => key,
        Err(_) => return false,
    };

    verifying_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let address = hex::encode(signing_key.verifying_key().to_bytes());
        (signing_key, address)
    }

    #[test]
    fn test_sign_and_verify() {
        let (key, address) = keypair();
        let message = b"redeem:00000000-0000-0000-0000-000000000000:50:shop-001";

        let signature = hex::encode(key.sign(message).to_bytes());
        assert!(verify_signature(message, &signature, &address));
    }

    #[test]
    fn test_wrong_signer_fails() {
        let (key, _) = keypair();
        let (_, other_address) = keypair();
        let message = b"redeem:s:50:shop-001";

        let signature = hex::encode(key.sign(message).to_bytes());
        assert!(!verify_signature(message, &signature, &other_address));
    }

    #[test]
    fn test_tampered_message_fails() {
        let (key, address) = keypair();
        let signature = hex::encode(key.sign(b"redeem:s:50:shop-001").to_bytes());

        assert!(!verify_signature(b"redeem:s:500:shop-001", &signature, &address));
    }

    #[test]
    fn test_0x_prefix_accepted() {
        let (key, address) = keypair();
        let message = b"redeem:s:50:shop-001";
        let signature = format!("0x{}", hex::encode(key.sign(message).to_bytes()));

        assert!(verify_signature(message, &signature, &format!("0x{}", address)));
    }

    #[test]
    fn test_garbage_input_is_invalid_not_panic() {
        assert!(!verify_signature(b"msg", "not-hex", "also-not-hex"));
        assert!(!verify_signature(b"msg", "abcd", "1234"));
    }
}
