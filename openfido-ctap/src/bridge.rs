//! Transport to engine bridge
//!
//! Implements [`openfido_transport::CommandHandler`] over an
//! [`AuthenticatorContext`], so every transport can hand its completed
//! requests to the same engine.

use alloc::vec::Vec;

use openfido_transport::{Cmd, CommandHandler, Detached, RequestChannel};

use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{HostChannel, KeepaliveStatus, RecordStore, UserPresence};
use crate::dispatcher::ctap_request_on;
use crate::u2f::u2f_request_on;

/// Engine view of a transport's request channel
struct Host<'a>(&'a mut dyn RequestChannel);

impl HostChannel for Host<'_> {
    fn keepalive(&mut self, status: KeepaliveStatus) {
        if let Err(err) = self.0.keepalive(status as u8) {
            log::warn!("keepalive {status:?} not sent: {err}");
        }
    }

    fn cancel_requested(&mut self) -> bool {
        self.0.cancel_requested().unwrap_or_else(|err| {
            log::warn!("host link unreadable during presence wait: {err}");
            false
        })
    }
}

pub struct TransportBridge<S: RecordStore, P: UserPresence> {
    ctx: AuthenticatorContext<S, P>,
}

impl<S: RecordStore, P: UserPresence> TransportBridge<S, P> {
    pub fn new(ctx: AuthenticatorContext<S, P>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AuthenticatorContext<S, P> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AuthenticatorContext<S, P> {
        &mut self.ctx
    }

    pub fn into_context(self) -> AuthenticatorContext<S, P> {
        self.ctx
    }
}

impl<S: RecordStore, P: UserPresence> CommandHandler for TransportBridge<S, P> {
    fn handle_command(&mut self, cmd: Cmd, data: &[u8]) -> openfido_transport::Result<Vec<u8>> {
        self.handle_request(cmd, data, &mut Detached)
    }

    fn handle_request(
        &mut self,
        cmd: Cmd,
        data: &[u8],
        channel: &mut dyn RequestChannel,
    ) -> openfido_transport::Result<Vec<u8>> {
        let mut host = Host(channel);
        match cmd {
            // CTAP failures travel inside the response as the status byte or
            // status word, never as a transport error
            Cmd::Cbor => Ok(ctap_request_on(&mut self.ctx, data, &mut host)),
            Cmd::Msg => Ok(u2f_request_on(&mut self.ctx, data, &mut host)),
            other => {
                log::warn!("{other:?} is not an authenticator request");
                Err(openfido_transport::Error::InvalidCommand)
            }
        }
    }

    fn cancel(&mut self) {
        self.ctx.cancel_token().cancel();
    }

    fn clear_pending(&mut self) {
        self.ctx.clear_cancel();
    }

    fn wink(&mut self) {
        self.ctx.presence_mut().wink();
    }
}
