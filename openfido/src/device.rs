//! Device assembly and the main loop
//!
//! A [`Device`] owns one authenticator context behind a
//! [`TransportBridge`] and a list of transports. Each tick polls every
//! transport once; requests are served in arrival order, one at a time.

use std::sync::atomic::{AtomicBool, Ordering};

use openfido_ctap::{AuthenticatorContext, RecordStore, TransportBridge, UserPresence};
use openfido_transport::{Transport, poll_all};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::store::FileStore;

pub struct Device<S: RecordStore, P: UserPresence> {
    transports: Vec<Box<dyn Transport>>,
    bridge: TransportBridge<S, P>,
}

impl<P: UserPresence> Device<FileStore, P> {
    /// Boot an authenticator whose records live under `config.state_dir`
    pub fn open(config: &DeviceConfig, presence: P) -> Result<Self> {
        let mut store = FileStore::open(&config.state_dir)?;
        store.garbage_collect()?;
        let ctx = AuthenticatorContext::new(config.authenticator.clone(), store, presence)?;
        Ok(Self::new(ctx))
    }
}

impl<S: RecordStore, P: UserPresence> Device<S, P> {
    pub fn new(ctx: AuthenticatorContext<S, P>) -> Self {
        Self {
            transports: Vec::new(),
            bridge: TransportBridge::new(ctx),
        }
    }

    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.add_transport(transport);
        self
    }

    pub fn add_transport(&mut self, transport: Box<dyn Transport>) {
        log::info!("{} transport enabled", transport.name());
        self.transports.push(transport);
    }

    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }

    pub fn context(&self) -> &AuthenticatorContext<S, P> {
        self.bridge.context()
    }

    pub fn context_mut(&mut self) -> &mut AuthenticatorContext<S, P> {
        self.bridge.context_mut()
    }

    /// Poll every transport once; returns how many links failed
    pub fn tick(&mut self) -> usize {
        poll_all(&mut self.transports, &mut self.bridge)
    }

    /// Serve requests until `should_stop` is raised
    ///
    /// Ends with an error when there is nothing to serve or when every
    /// transport failed in the same tick.
    pub fn run(&mut self, should_stop: &AtomicBool) -> Result<()> {
        if self.transports.is_empty() {
            return Err(Error::Config("no transport enabled".into()));
        }
        log::info!("serving on {}", self.transport_names().join(", "));

        while !should_stop.load(Ordering::SeqCst) {
            let failures = self.tick();
            if failures == self.transports.len() {
                return Err(openfido_transport::Error::IoError(
                    "every transport failed".into(),
                )
                .into());
            }
        }
        log::info!("device stopped");
        Ok(())
    }

    pub fn into_context(self) -> AuthenticatorContext<S, P> {
        self.bridge.into_context()
    }
}

/// Transports this build can bring up on its own
///
/// BLE and NFC need a radio frontend and are added by the board code with
/// [`Device::add_transport`].
pub fn default_transports(config: &DeviceConfig) -> Result<Vec<Box<dyn Transport>>> {
    #[allow(unused_mut)]
    let mut transports: Vec<Box<dyn Transport>> = Vec::new();

    #[cfg(all(feature = "uhid", target_os = "linux"))]
    {
        let device = openfido_transport::UhidDevice::create("openfido virtual authenticator")?;
        transports.push(Box::new(
            openfido_transport::HidTransport::new(device).with_poll_timeout(config.poll_timeout),
        ));
    }
    #[cfg(not(all(feature = "uhid", target_os = "linux")))]
    let _ = config;

    Ok(transports)
}
