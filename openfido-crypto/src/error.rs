//! Error types for cryptographic operations

#[cfg(feature = "std")]
use thiserror::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

/// Cryptographic operation errors
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("ECDH key agreement failed")]
    KeyAgreementFailed,

    #[error("invalid COSE key")]
    InvalidCoseKey,

    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Cryptographic operation errors
#[cfg(not(feature = "std"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    InvalidPublicKey,
    InvalidPrivateKey,
    InvalidSignature,
    DecryptionFailed,
    EncryptionFailed,
    InvalidKeyLength { expected: usize, actual: usize },
    KeyAgreementFailed,
    InvalidCoseKey,
    KeyDerivationFailed,
}

#[cfg(not(feature = "std"))]
impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPublicKey => write!(f, "invalid public key"),
            Self::InvalidPrivateKey => write!(f, "invalid private key"),
            Self::InvalidSignature => write!(f, "invalid signature"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::EncryptionFailed => write!(f, "encryption failed"),
            Self::InvalidKeyLength { expected, actual } => {
                write!(f, "invalid key length: expected {}, got {}", expected, actual)
            }
            Self::KeyAgreementFailed => write!(f, "ECDH key agreement failed"),
            Self::InvalidCoseKey => write!(f, "invalid COSE key"),
            Self::KeyDerivationFailed => write!(f, "key derivation failed"),
        }
    }
}

/// Result type alias for cryptographic operations
pub type Result<T> = core::result::Result<T, CryptoError>;
