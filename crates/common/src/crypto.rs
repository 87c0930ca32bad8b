//! Cryptographic contracts used by the parser and the sync pipeline.
//!
//! The node never signs anything itself except outgoing dump envelopes; what
//! it needs from this module is hashing, signature verification and the
//! pubkey-to-address derivation. All three operate on raw byte slices so the
//! domain crates can wrap them in their own types.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Length of a derived wallet address in bytes: one scheme byte, a 20-byte
/// public key digest and a 4-byte checksum.
pub const ADDRESS_LEN: usize = 25;

/// Wallet address scheme byte.
pub const ADDRESS_TAG_WALLET: u8 = 0x00;
/// Contract (script) address scheme byte.
pub const ADDRESS_TAG_SCRIPT: u8 = 0x08;
/// Token address scheme byte.
pub const ADDRESS_TAG_TOKEN: u8 = 0x09;

/// SHA-256 applied twice, the canonical hash of blocks and transactions.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Derives the 25-byte binary address for a public key.
///
/// Layout is `tag || digest[..20] || checksum` where `digest` is the double
/// SHA-256 of the key bytes and `checksum` is the first four bytes of the
/// double SHA-256 of the preceding 21 bytes.
pub fn address_from_pubkey(pubkey: &[u8]) -> [u8; ADDRESS_LEN] {
    let digest = double_sha256(pubkey);
    let mut out = [0u8; ADDRESS_LEN];
    out[0] = ADDRESS_TAG_WALLET;
    out[1..21].copy_from_slice(&digest[..20]);
    let checksum = double_sha256(&out[..21]);
    out[21..].copy_from_slice(&checksum[..4]);
    out
}

/// Signs `message` with a 32-byte ed25519 secret; the inverse of
/// [`verify_signature`]. Used for the outgoing dump envelope.
pub fn sign_data(secret: &[u8; 32], message: &[u8]) -> Vec<u8> {
    use ed25519_dalek::Signer;
    let key = ed25519_dalek::SigningKey::from_bytes(secret);
    key.sign(message).to_bytes().to_vec()
}

/// Public key of a 32-byte ed25519 secret.
pub fn pubkey_of(secret: &[u8; 32]) -> Vec<u8> {
    let key = ed25519_dalek::SigningKey::from_bytes(secret);
    key.verifying_key().as_bytes().to_vec()
}

/// Verifies `sign` over `message` against `pubkey`.
///
/// Malformed keys or signatures verify as `false`; the parser treats both
/// the same way as a bad signature.
pub fn verify_signature(sign: &[u8], pubkey: &[u8], message: &[u8]) -> bool {
    let Ok(key_bytes) = <&[u8; 32]>::try_from(pubkey) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(sign) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn double_sha256_is_stable() {
        let hash = double_sha256(b"abc");
        // SHA-256 applied twice to "abc", well-known vector.
        assert_eq!(
            hex::encode(hash),
            "4f8b42c22dd3729b519ba6f68d2da7cc5b2d606d05daed5ad5128cc03e6c6358"
        );
    }

    #[test]
    fn derived_address_has_valid_checksum() {
        let addr = address_from_pubkey(b"some public key material");
        assert_eq!(addr[0], ADDRESS_TAG_WALLET);
        let checksum = double_sha256(&addr[..21]);
        assert_eq!(&addr[21..], &checksum[..4]);
    }

    #[test]
    fn signature_roundtrip() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let message = b"payload under test";
        let sign = key.sign(message);
        assert!(verify_signature(
            &sign.to_bytes(),
            key.verifying_key().as_bytes(),
            message
        ));
        assert!(!verify_signature(
            &sign.to_bytes(),
            key.verifying_key().as_bytes(),
            b"different payload"
        ));
    }

    #[test]
    fn garbage_key_fails_closed() {
        assert!(!verify_signature(&[0u8; 64], &[0u8; 7], b"x"));
    }
}
