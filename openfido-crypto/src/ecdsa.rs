//! ES256 (P-256 + SHA-256) signatures
//!
//! Signatures are returned DER-encoded, which is what CTAP2 `attStmt.sig`,
//! assertion signatures and U2F register/authenticate responses carry.

use alloc::vec::Vec;

use crate::ecdh::split_uncompressed;
use crate::error::{CryptoError, Result};

use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer, signature::Verifier};
use rand::rngs::OsRng;

/// Generate a random signing key, returning `(private, sec1_public)`
pub fn generate_keypair() -> ([u8; 32], Vec<u8>) {
    let signing_key = SigningKey::random(&mut OsRng);
    let private_key: [u8; 32] = signing_key.to_bytes().into();
    let public_key = signing_key
        .verifying_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    (private_key, public_key)
}

/// Sign `data` (hashed internally with SHA-256), DER output
pub fn sign(private_key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    let signing_key =
        SigningKey::from_bytes(private_key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let signature: Signature = signing_key.sign(data);
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verify a DER signature against an uncompressed SEC1 public key
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = Signature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify(data, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Uncompressed SEC1 public key for a private scalar
pub fn public_from_private(private_key: &[u8; 32]) -> Result<Vec<u8>> {
    let signing_key =
        SigningKey::from_bytes(private_key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    Ok(signing_key
        .verifying_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec())
}

/// COSE `(x, y)` coordinates of the public key for a private scalar
pub fn public_cose_from_private(private_key: &[u8; 32]) -> Result<([u8; 32], [u8; 32])> {
    let sec1 = public_from_private(private_key)?;
    Ok(split_uncompressed(&sec1))
}

/// Check whether 32 bytes form a valid non-zero scalar below the group order
pub fn is_valid_private_key(private_key: &[u8; 32]) -> bool {
    SigningKey::from_bytes(private_key.into()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let (private_key, public_key) = generate_keypair();
        let message = b"authData || clientDataHash";

        let signature = sign(&private_key, message).unwrap();
        assert!(signature.len() >= 68 && signature.len() <= 72);
        assert_eq!(signature[0], 0x30);

        verify(&public_key, message, &signature).unwrap();
        assert!(verify(&public_key, b"other", &signature).is_err());
    }

    #[test]
    fn test_public_key_is_deterministic() {
        let private_key = [42u8; 32];
        let a = public_from_private(&private_key).unwrap();
        let b = public_from_private(&private_key).unwrap();
        assert_eq!(a, b);

        let (x, y) = public_cose_from_private(&private_key).unwrap();
        assert_eq!(&a[1..33], &x);
        assert_eq!(&a[33..], &y);
    }

    #[test]
    fn test_zero_scalar_is_rejected() {
        assert!(!is_valid_private_key(&[0u8; 32]));
        assert!(sign(&[0u8; 32], b"x").is_err());
        assert!(is_valid_private_key(&[7u8; 32]));
    }
}
