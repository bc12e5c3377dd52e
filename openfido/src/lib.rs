//! # openfido
//!
//! A FIDO2 / U2F authenticator device: the [`openfido_ctap`] engine wired to
//! the transports of [`openfido_transport`], with a file-backed record store
//! and environment-driven configuration for hosted builds.
//!
//! ## Features
//!
//! - `hid`, `ble`, `nfc`: transport front ends (all on by default)
//! - `uhid`: Linux virtual HID device, used by [`default_transports`]
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//!
//! use openfido::{AutoApprove, Device, DeviceConfig, default_transports};
//!
//! # fn main() -> openfido::Result<()> {
//! let config = DeviceConfig::from_env()?;
//! let mut device = Device::open(&config, AutoApprove)?;
//! for transport in default_transports(&config)? {
//!     device.add_transport(transport);
//! }
//! device.run(&AtomicBool::new(false))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod presence;
pub mod store;

pub use config::DeviceConfig;
pub use device::{Device, default_transports};
pub use error::{Error, Result};
pub use presence::{AutoApprove, PresenceButton};
pub use store::FileStore;

pub use openfido_ctap::{AuthenticatorConfig, AuthenticatorContext, ctap_request, u2f_request};
