//! Self-authenticating credential ids
//!
//! Layout: `tag[16] || nonce[16] || rpIdHash[32] || count(u32 LE)`. The tag
//! binds the rest of the id to this device's master secret, so any id a
//! client presents can be checked without storing it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

use openfido_crypto::kdf;

use crate::status::Result;

pub const CREDENTIAL_TAG_SIZE: usize = 16;
pub const CREDENTIAL_NONCE_SIZE: usize = 16;
pub const CREDENTIAL_ID_SIZE: usize = CREDENTIAL_TAG_SIZE + CREDENTIAL_NONCE_SIZE + 32 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialId {
    pub tag: [u8; CREDENTIAL_TAG_SIZE],
    pub nonce: [u8; CREDENTIAL_NONCE_SIZE],
    pub rp_id_hash: [u8; 32],
    pub count: u32,
}

/// `HMAC-SHA-256(transport_key, rpIdHash || nonce || count_le)[..16]`
pub fn make_auth_tag(
    transport_key: &[u8],
    rp_id_hash: &[u8; 32],
    nonce: &[u8; CREDENTIAL_NONCE_SIZE],
    count: u32,
) -> Result<[u8; CREDENTIAL_TAG_SIZE]> {
    let mac = kdf::hmac_sha256(transport_key, &[rp_id_hash, nonce, &count.to_le_bytes()])?;
    let mut tag = [0u8; CREDENTIAL_TAG_SIZE];
    tag.copy_from_slice(&mac[..CREDENTIAL_TAG_SIZE]);
    Ok(tag)
}

impl CredentialId {
    pub fn from_parts(
        tag: [u8; CREDENTIAL_TAG_SIZE],
        nonce: [u8; CREDENTIAL_NONCE_SIZE],
        rp_id_hash: [u8; 32],
        count: u32,
    ) -> Self {
        Self {
            tag,
            nonce,
            rp_id_hash,
            count,
        }
    }

    /// Mint a fresh id for `rp_id_hash` with a random nonce
    pub fn generate(transport_key: &[u8], rp_id_hash: &[u8; 32], count: u32) -> Result<Self> {
        use rand::RngCore;
        let mut nonce = [0u8; CREDENTIAL_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let tag = make_auth_tag(transport_key, rp_id_hash, &nonce, count)?;
        Ok(Self::from_parts(tag, nonce, *rp_id_hash, count))
    }

    /// Parse exactly [`CREDENTIAL_ID_SIZE`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CREDENTIAL_ID_SIZE {
            return None;
        }
        let mut id = Self::from_parts([0; 16], [0; 16], [0; 32], 0);
        id.tag.copy_from_slice(&bytes[..16]);
        id.nonce.copy_from_slice(&bytes[16..32]);
        id.rp_id_hash.copy_from_slice(&bytes[32..64]);
        id.count = u32::from_le_bytes([bytes[64], bytes[65], bytes[66], bytes[67]]);
        Some(id)
    }

    pub fn to_bytes(&self) -> [u8; CREDENTIAL_ID_SIZE] {
        let mut out = [0u8; CREDENTIAL_ID_SIZE];
        out[..16].copy_from_slice(&self.tag);
        out[16..32].copy_from_slice(&self.nonce);
        out[32..64].copy_from_slice(&self.rp_id_hash);
        out[64..].copy_from_slice(&self.count.to_le_bytes());
        out
    }

    /// True when the id was minted by this device for `rp_id_hash`
    pub fn authenticate(&self, transport_key: &[u8], rp_id_hash: &[u8; 32]) -> bool {
        if !bool::from(self.rp_id_hash.ct_eq(rp_id_hash)) {
            return false;
        }
        match make_auth_tag(transport_key, &self.rp_id_hash, &self.nonce, self.count) {
            Ok(tag) => tag.ct_eq(&self.tag).into(),
            Err(_) => false,
        }
    }

    /// Per-credential P-256 private key
    pub fn private_key(&self, transport_key2: &[u8]) -> Result<[u8; 32]> {
        Ok(kdf::derive_credential_key(transport_key2, &self.to_bytes())?)
    }

    /// Per-credential hmac-secret key
    pub fn cred_random(&self, transport_key2: &[u8]) -> Result<[u8; 32]> {
        Ok(kdf::hmac_sha256(transport_key2, &[&self.to_bytes()])?)
    }
}

impl Serialize for CredentialId {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for CredentialId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| serde::de::Error::invalid_length(bytes.len(), &"68-byte credential id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x11; 32];
    const KEY2: [u8; 32] = [0x22; 32];
    const RP: [u8; 32] = [0x33; 32];

    #[test]
    fn test_layout() {
        let id = CredentialId::from_parts([1; 16], [2; 16], [3; 32], 0x0102_0304);
        let bytes = id.to_bytes();
        assert_eq!(bytes.len(), 68);
        assert_eq!(&bytes[64..], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(CredentialId::from_bytes(&bytes), Some(id));
        assert_eq!(CredentialId::from_bytes(&bytes[..67]), None);
    }

    #[test]
    fn test_generated_id_authenticates() {
        let id = CredentialId::generate(&KEY, &RP, 7).unwrap();
        assert!(id.authenticate(&KEY, &RP));
        assert!(!id.authenticate(&KEY2, &RP));
        assert!(!id.authenticate(&KEY, &[0x34; 32]));
    }

    #[test]
    fn test_any_tag_bit_flip_fails() {
        let id = CredentialId::generate(&KEY, &RP, 7).unwrap();
        let bytes = id.to_bytes();
        for bit in 0..(CREDENTIAL_TAG_SIZE * 8) {
            let mut tampered = bytes;
            tampered[bit / 8] ^= 1 << (bit % 8);
            let parsed = CredentialId::from_bytes(&tampered).unwrap();
            assert!(!parsed.authenticate(&KEY, &RP), "bit {bit}");
        }
    }

    #[test]
    fn test_counter_is_covered_by_tag() {
        let mut id = CredentialId::generate(&KEY, &RP, 7).unwrap();
        id.count = 8;
        assert!(!id.authenticate(&KEY, &RP));
    }

    #[test]
    fn test_private_key_is_stable_per_id() {
        let a = CredentialId::generate(&KEY, &RP, 1).unwrap();
        let b = CredentialId::generate(&KEY, &RP, 1).unwrap();
        assert_eq!(a.private_key(&KEY2).unwrap(), a.private_key(&KEY2).unwrap());
        assert_ne!(a.private_key(&KEY2).unwrap(), b.private_key(&KEY2).unwrap());
        assert_ne!(a.cred_random(&KEY2).unwrap(), a.private_key(&KEY2).unwrap());
    }
}
