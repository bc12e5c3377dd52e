//! CTAP2 and U2F authenticator engine
//!
//! Everything between a transport delivering a request and the bytes it
//! sends back: command dispatch, the PIN protocol, credential wrapping,
//! resident keys, signature counters and the `hmac-secret` extension.
//!
//! The engine runs on hosted and embedded targets alike. Hardware is reached
//! through [`UserPresence`] and [`RecordStore`]; state lives in one
//! [`AuthenticatorContext`] the caller owns and lends to each request.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod authenticator;
#[cfg(feature = "transport")]
pub mod bridge;
pub mod callbacks;
pub mod cbor;
pub mod commands;
pub mod credential;
pub mod dispatcher;
pub mod extensions;
pub mod secret;
pub mod state;
pub mod status;
pub mod store;
pub mod types;
pub mod u2f;
pub mod wait;

#[cfg(test)]
mod testing;

pub use authenticator::{AuthenticatorConfig, AuthenticatorContext};
#[cfg(feature = "transport")]
pub use bridge::TransportBridge;
pub use callbacks::{
    HostChannel, KeepaliveStatus, NoHost, RecordStore, StoreError, UpResult, UserPresence,
};
pub use dispatcher::{ctap_request, ctap_request_on};
pub use status::{Result, StatusCode};
pub use store::MemoryStore;
pub use types::{
    CoseAlgorithm, PublicKeyCredentialDescriptor, RelyingParty, RequestOptions, User,
};
pub use u2f::{u2f_request, u2f_request_on};
#[cfg(feature = "std")]
pub use wait::SystemClock;
pub use wait::{CancelToken, Clock, WaitCondition};
