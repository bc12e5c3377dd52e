//! Transports as trait objects
//!
//! Each enabled transport is one [`Transport`]; the device loop keeps them in
//! a list and polls every entry once per tick.

use crate::error::Result;
use crate::handler::CommandHandler;

pub trait Transport {
    fn name(&self) -> &'static str;

    /// Service at most one unit of input and write any response
    ///
    /// Framing errors are answered on the wire and are not returned; `Err`
    /// means the underlying link failed.
    fn poll(&mut self, handler: &mut dyn CommandHandler) -> Result<()>;
}

/// Poll every transport once
///
/// A failing link is logged and skipped so the others keep running; the
/// number of failures is returned.
pub fn poll_all(transports: &mut [Box<dyn Transport>], handler: &mut dyn CommandHandler) -> usize {
    let mut failures = 0;
    for transport in transports.iter_mut() {
        if let Err(err) = transport.poll(handler) {
            log::error!("{} transport: {err}", transport.name());
            failures += 1;
        }
    }
    failures
}
