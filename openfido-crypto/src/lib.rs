//! Cryptographic primitives used by the openfido authenticator
//!
//! - **ECDH**: P-256 key agreement for PIN protocol one and hmac-secret
//! - **ECDSA**: ES256 signatures for attestation, assertions and U2F
//! - **PIN protocol one**: AES-256-CBC with a zero IV and truncated HMAC-SHA-256
//! - **KDF**: HMAC helpers, credential tags and per-credential key derivation
//!
//! The crate builds without `std` (with `alloc`).

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod ecdh;
pub mod ecdsa;
pub mod error;
pub mod kdf;
pub mod pin_protocol;

pub use error::{CryptoError, Result};
