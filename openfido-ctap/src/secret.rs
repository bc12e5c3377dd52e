//! Fixed-size secret storage
//!
//! Master secret, PIN hash, PIN token and PIN salt live in [`Secret`], which
//! zeroes itself on drop, compares in constant time and never prints its
//! contents.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret<const N: usize>([u8; N]);

impl<const N: usize> Secret<N> {
    pub const fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub const fn zeroed() -> Self {
        Self([0u8; N])
    }

    /// Fill from the process RNG
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; N];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; N] {
        &mut self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.ct_eq(&[0u8; N]).into()
    }

    /// Constant-time comparison of a prefix
    pub fn ct_eq_prefix(&self, other: &[u8]) -> bool {
        other.len() <= N && bool::from(self.0[..other.len()].ct_eq(other))
    }

    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Default for Secret<N> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl<const N: usize> Eq for Secret<N> {}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret<{}>([REDACTED])", N)
    }
}

impl<const N: usize> Serialize for Secret<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de, const N: usize> Deserialize<'de> for Secret<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut buf = serde_bytes::ByteBuf::deserialize(deserializer)?.into_vec();
        if buf.len() != N {
            buf.zeroize();
            return Err(serde::de::Error::invalid_length(buf.len(), &"fixed-size secret"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&buf);
        buf.zeroize();
        Ok(Self(out))
    }
}
