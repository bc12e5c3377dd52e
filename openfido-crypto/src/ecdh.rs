//! P-256 key agreement
//!
//! Used by `clientPin` (getKeyAgreement, setPin, changePin, getPinToken) and
//! by the hmac-secret extension. The shared secret handed to callers is the
//! x-coordinate of the ECDH point; PIN protocol one hashes it with SHA-256.

use alloc::vec::Vec;

use crate::error::{CryptoError, Result};

use p256::{PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand::rngs::OsRng;

/// Ephemeral P-256 key pair used for platform key agreement
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Rebuild a key pair from a 32-byte scalar
    pub fn from_bytes(secret_bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_bytes(secret_bytes.into())
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Public key as the `(x, y)` affine coordinates of a COSE EC2 key
    pub fn public_key_cose(&self) -> ([u8; 32], [u8; 32]) {
        let point = self.public.to_encoded_point(false);
        split_uncompressed(point.as_bytes())
    }

    /// Public key in uncompressed SEC1 form (`0x04 || x || y`)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// ECDH with a peer given in uncompressed SEC1 form
    ///
    /// Returns the x-coordinate of the shared point.
    pub fn shared_secret(&self, peer_public_key: &[u8]) -> Result<[u8; 32]> {
        let peer = PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut secret = [0u8; 32];
        secret.copy_from_slice(shared.raw_secret_bytes());
        Ok(secret)
    }

    /// ECDH with a peer given as COSE `(x, y)` coordinates
    pub fn shared_secret_cose(&self, x: &[u8], y: &[u8]) -> Result<[u8; 32]> {
        if x.len() != 32 || y.len() != 32 {
            return Err(CryptoError::InvalidCoseKey);
        }
        let mut sec1 = [0u8; 65];
        sec1[0] = 0x04;
        sec1[1..33].copy_from_slice(x);
        sec1[33..].copy_from_slice(y);
        self.shared_secret(&sec1)
    }
}

/// Split a 65-byte uncompressed point into its coordinates
pub(crate) fn split_uncompressed(sec1: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    if sec1.len() == 65 {
        x.copy_from_slice(&sec1[1..33]);
        y.copy_from_slice(&sec1[33..65]);
    }
    (x, y)
}
