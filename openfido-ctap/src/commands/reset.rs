//! authenticatorReset command
//!
//! Wipes the PIN, every resident key and the master secret after a fresh
//! touch. Credentials minted before the reset stop authenticating.

use alloc::vec::Vec;

use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{HostChannel, RecordStore, UserPresence};
use crate::status::Result;

pub fn handle<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    host: &mut dyn HostChannel,
) -> Result<Vec<u8>> {
    ctx.require_user_presence(host)?;
    ctx.reset()?;
    Ok(Vec::new())
}
