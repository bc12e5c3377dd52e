//! PIN protocol one
//!
//! - shared key: `SHA-256(ECDH x-coordinate)`
//! - encryption: AES-256-CBC, zero IV, no padding (inputs are block aligned)
//! - authentication: first 16 bytes of HMAC-SHA-256

use crate::error::{CryptoError, Result};
use crate::kdf::hmac_sha256;

use alloc::vec::Vec;

use aes::Aes256;
use cbc::{
    Decryptor, Encryptor,
    cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// AES block size; every ciphertext in PIN protocol one is a multiple of it
pub const BLOCK_SIZE: usize = 16;

/// Length of `pinAuth` / `saltAuth` values
pub const AUTH_TAG_SIZE: usize = 16;

/// Derive the shared key from the raw ECDH x-coordinate
pub fn derive_shared_key(ecdh_x: &[u8; 32]) -> [u8; 32] {
    Sha256::digest(ecdh_x).into()
}

/// Encrypt block-aligned plaintext under `key`
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::EncryptionFailed);
    }
    let mut buffer = plaintext.to_vec();
    let len = buffer.len();
    Aes256CbcEnc::new(key.into(), &[0u8; BLOCK_SIZE].into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(buffer)
}

/// Decrypt block-aligned ciphertext under `key`
pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::DecryptionFailed);
    }
    let mut buffer = ciphertext.to_vec();
    Aes256CbcDec::new(key.into(), &[0u8; BLOCK_SIZE].into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(buffer)
}

/// `HMAC-SHA-256(key, parts...)[0..16]`
pub fn authenticate(key: &[u8], parts: &[&[u8]]) -> Result<[u8; AUTH_TAG_SIZE]> {
    let mac = hmac_sha256(key, parts)?;
    let mut out = [0u8; AUTH_TAG_SIZE];
    out.copy_from_slice(&mac[..AUTH_TAG_SIZE]);
    Ok(out)
}

/// Constant-time check of a 16-byte authenticator over `parts`
pub fn verify(key: &[u8], parts: &[&[u8]], expected: &[u8]) -> Result<bool> {
    if expected.len() != AUTH_TAG_SIZE {
        return Ok(false);
    }
    let computed = authenticate(key, parts)?;
    Ok(computed.ct_eq(expected).into())
}
