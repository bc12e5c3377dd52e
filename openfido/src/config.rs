//! Device configuration
//!
//! Defaults suit a hosted virtual authenticator. Each value can be
//! overridden through the environment:
//!
//! | variable | meaning |
//! |---|---|
//! | `OPENFIDO_STATE_DIR` | directory holding the record store |
//! | `OPENFIDO_UP_TIMEOUT_MS` | user presence window |
//! | `OPENFIDO_BLE_MTU` | negotiated ATT MTU for BLE notifications |
//! | `OPENFIDO_POLL_MS` | per-transport poll timeout |

use std::path::{Path, PathBuf};
use std::time::Duration;

use openfido_ctap::AuthenticatorConfig;

use crate::error::{Error, Result};

pub const ENV_STATE_DIR: &str = "OPENFIDO_STATE_DIR";
pub const ENV_UP_TIMEOUT_MS: &str = "OPENFIDO_UP_TIMEOUT_MS";
pub const ENV_BLE_MTU: &str = "OPENFIDO_BLE_MTU";
pub const ENV_POLL_MS: &str = "OPENFIDO_POLL_MS";

const DEFAULT_STATE_DIR: &str = "openfido-state";
const DEFAULT_BLE_MTU: usize = 23;
const DEFAULT_POLL: Duration = Duration::from_millis(10);

/// ATT header bytes subtracted from the MTU
const ATT_HEADER: usize = 3;
/// Smallest MTU that still leaves room for a BLE initial fragment
const MIN_BLE_MTU: usize = 23;
const MAX_BLE_MTU: usize = 517;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub state_dir: PathBuf,
    pub ble_mtu: usize,
    pub poll_timeout: Duration,
    pub authenticator: AuthenticatorConfig,
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            ble_mtu: DEFAULT_BLE_MTU,
            poll_timeout: DEFAULT_POLL,
            authenticator: AuthenticatorConfig::new(),
        }
    }

    /// Defaults overridden by the `OPENFIDO_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`DeviceConfig::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::new();

        if let Some(dir) = lookup(ENV_STATE_DIR) {
            if dir.trim().is_empty() {
                return Err(Error::Config(format!("{ENV_STATE_DIR} is empty")));
            }
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_UP_TIMEOUT_MS) {
            let ms = parse_number(ENV_UP_TIMEOUT_MS, &ms)?;
            if ms == 0 {
                return Err(Error::Config(format!("{ENV_UP_TIMEOUT_MS} must be positive")));
            }
            config = config.with_user_presence_timeout(Duration::from_millis(ms));
        }
        if let Some(mtu) = lookup(ENV_BLE_MTU) {
            let mtu = parse_number(ENV_BLE_MTU, &mtu)? as usize;
            config = config.with_ble_mtu(mtu)?;
        }
        if let Some(ms) = lookup(ENV_POLL_MS) {
            config.poll_timeout = Duration::from_millis(parse_number(ENV_POLL_MS, &ms)?);
        }

        log::debug!("device config: {config:?}");
        Ok(config)
    }

    pub fn with_state_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.state_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_user_presence_timeout(mut self, timeout: Duration) -> Self {
        self.authenticator.user_presence_timeout = timeout;
        self
    }

    pub fn with_ble_mtu(mut self, mtu: usize) -> Result<Self> {
        if !(MIN_BLE_MTU..=MAX_BLE_MTU).contains(&mtu) {
            return Err(Error::Config(format!(
                "BLE MTU {mtu} outside {MIN_BLE_MTU}..={MAX_BLE_MTU}"
            )));
        }
        self.ble_mtu = mtu;
        Ok(self)
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_authenticator(mut self, authenticator: AuthenticatorConfig) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Usable notification length for BLE responses
    pub fn ble_frame_size(&self) -> usize {
        self.ble_mtu - ATT_HEADER
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}: expected a number, got {value:?}")))
}
