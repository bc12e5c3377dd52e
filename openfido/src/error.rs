//! Device-level errors

use openfido_ctap::{StatusCode, StoreError};

/// Anything that can stop the device from booting or running
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] openfido_transport::Error),

    #[error("authenticator: {0}")]
    Ctap(#[from] StatusCode),

    #[error("crypto: {0}")]
    Crypto(#[from] openfido_crypto::CryptoError),

    #[error("record store: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
