//! HMAC and HKDF helpers
//!
//! Credential ids are self-authenticating: the 16-byte tag is an HMAC under a
//! device key over the relying-party hash, nonce and counter. The private key
//! for a credential is never stored; it is re-derived from the credential id
//! with HKDF-SHA-256 on every use.

use crate::ecdsa::is_valid_private_key;
use crate::error::{CryptoError, Result};

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Context string mixed into every derived credential key
const CREDENTIAL_KEY_INFO: &[u8] = b"openfido credential key";

/// Attempts before giving up on finding an in-range scalar
const MAX_DERIVE_ROUNDS: u8 = 16;

/// `HMAC-SHA-256(key, parts[0] || parts[1] || ...)`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        actual: key.len(),
    })?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Derive the P-256 private scalar addressed by a credential id
///
/// HKDF output that falls outside the scalar range is re-expanded with an
/// incremented round byte.
pub fn derive_credential_key(salt: &[u8], credential_id: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), credential_id);
    let mut okm = [0u8; 32];
    for round in 0..MAX_DERIVE_ROUNDS {
        hk.expand_multi_info(&[CREDENTIAL_KEY_INFO, &[round][..]], &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        if is_valid_private_key(&okm) {
            return Ok(okm);
        }
    }
    okm.zeroize();
    Err(CryptoError::KeyDerivationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_hmac_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", &[b"what do ya want ", b"for nothing?"]).unwrap();
        assert_eq!(
            mac,
            hex!("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
    }

    #[test]
    fn test_credential_key_is_stable_and_id_bound() {
        let salt = [9u8; 64];
        let a = derive_credential_key(&salt, &[1u8; 68]).unwrap();
        let b = derive_credential_key(&salt, &[1u8; 68]).unwrap();
        let c = derive_credential_key(&salt, &[2u8; 68]).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(is_valid_private_key(&a));
    }
}
