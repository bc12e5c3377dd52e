//! CTAPHID command processing
//!
//! [`CtapHidHandler`] owns the channel table and answers the transport-level
//! commands itself (`INIT`, `PING`, `WINK`, `LOCK`, `SYNC`, `CANCEL`).
//! Authenticator requests (`CBOR`, `MSG`) are handed to a [`CommandHandler`].

use std::time::Instant;

use crate::channel::{ChannelState, ChannelTable};
use crate::ctaphid::{
    BROADCAST_CID, Cmd, ErrorCode, INTERFACE_VERSION, Message, Packet, capability,
};
use crate::error::{Error, Result};

/// Firmware version reported by `INIT`
pub const DEVICE_VERSION: (u8, u8, u8) = (1, 0, 2);

const INIT_NONCE_SIZE: usize = 8;

/// The host end of a transport while one request is being served
pub trait RequestChannel {
    /// Send a `KEEPALIVE` frame carrying `status`
    fn keepalive(&mut self, status: u8) -> Result<()>;

    /// Read whatever the host sent meanwhile; true once it asked to cancel
    fn cancel_requested(&mut self) -> Result<bool>;
}

/// Channel of a transport that cannot reach the host mid-request
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl RequestChannel for Detached {
    fn keepalive(&mut self, _status: u8) -> Result<()> {
        Ok(())
    }

    fn cancel_requested(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// The authenticator as seen from a transport
///
/// Shared by every transport: HID and BLE hand over `Cbor` and `Msg`
/// requests, NFC maps its APDU instructions onto the same two commands.
pub trait CommandHandler {
    /// Run one request
    ///
    /// `Cbor` responses start with the CTAP status byte; `Msg` responses end
    /// with an ISO 7816 status word. `Err` is reserved for requests the
    /// authenticator cannot take at all.
    fn handle_command(&mut self, cmd: Cmd, data: &[u8]) -> Result<Vec<u8>>;

    /// Run one request while `channel` stays open to the host
    ///
    /// Handlers that wait on the user send keepalives and watch for CANCEL
    /// through `channel`.
    fn handle_request(
        &mut self,
        cmd: Cmd,
        data: &[u8],
        channel: &mut dyn RequestChannel,
    ) -> Result<Vec<u8>> {
        let _ = channel;
        self.handle_command(cmd, data)
    }

    /// Abort a pending user presence wait
    fn cancel(&mut self) {}

    /// A channel was initialised; forget any cancel still pending
    fn clear_pending(&mut self) {}

    /// Flash an indicator
    fn wink(&mut self) {}
}

/// CTAPHID state machine over the channel table
pub struct CtapHidHandler {
    channels: ChannelTable,
}

impl CtapHidHandler {
    pub fn new() -> Self {
        Self {
            channels: ChannelTable::new(Instant::now()),
        }
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// Evict channels that have been idle too long
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        self.channels.evict_idle(now)
    }

    /// Answer one complete message; the result may be empty
    ///
    /// `channel` reaches the host while an authenticator request runs.
    pub fn process_message(
        &mut self,
        message: Message,
        handler: &mut dyn CommandHandler,
        channel: &mut dyn RequestChannel,
        now: Instant,
    ) -> Vec<Packet> {
        let cid = message.cid;
        let Some(entry) = self.channels.get_mut(cid) else {
            log::warn!("request on unknown channel {cid:#010x}");
            return vec![Packet::error(cid, ErrorCode::ChannelBusy)];
        };
        entry.set_state(ChannelState::Ready, now);

        log::debug!("{:?} on {cid:#010x}, {} bytes", message.cmd, message.data.len());
        let response = self.dispatch(message, handler, channel, now);

        if let Some(channel) = self.channels.get_mut(cid) {
            channel.set_state(ChannelState::Idle, now);
        }

        match response.and_then(|reply| reply.map(|m| m.to_packets()).transpose()) {
            Ok(Some(packets)) => packets,
            Ok(None) => Vec::new(),
            Err(err) => {
                log::warn!("channel {cid:#010x}: {err}");
                vec![Packet::error(cid, err.to_error_code())]
            }
        }
    }

    fn dispatch(
        &mut self,
        message: Message,
        handler: &mut dyn CommandHandler,
        channel: &mut dyn RequestChannel,
        now: Instant,
    ) -> Result<Option<Message>> {
        let Message { cid, cmd, data } = message;
        let reply = |data: Vec<u8>| -> Result<Option<Message>> {
            Ok(Some(Message::new(cid, cmd, data)))
        };

        match cmd {
            Cmd::Init => {
                let response = self.init(cid, &data, now)?;
                handler.clear_pending();
                reply(response)
            }
            Cmd::Ping => reply(data),
            Cmd::Cbor | Cmd::Msg => reply(handler.handle_request(cmd, &data, channel)?),
            Cmd::Wink => {
                handler.wink();
                reply(Vec::new())
            }
            Cmd::Lock => reply(vec![ErrorCode::InvalidCmd.to_u8()]),
            Cmd::Sync => Ok(None),
            Cmd::Cancel => {
                handler.cancel();
                Ok(None)
            }
            Cmd::Keepalive | Cmd::Error => Err(Error::InvalidCommand),
        }
    }

    /// `INIT` on broadcast allocates a channel; on an existing channel it
    /// resets that channel and keeps its id
    fn init(&mut self, cid: u32, nonce: &[u8], now: Instant) -> Result<Vec<u8>> {
        if nonce.len() != INIT_NONCE_SIZE {
            return Err(Error::InvalidLength);
        }

        let new_cid = if cid == BROADCAST_CID {
            self.channels.allocate(now)?
        } else {
            if let Some(channel) = self.channels.get_mut(cid) {
                channel.reset(now);
            }
            cid
        };

        let (major, minor, build) = DEVICE_VERSION;
        let mut response = Vec::with_capacity(17);
        response.extend_from_slice(nonce);
        response.extend_from_slice(&new_cid.to_be_bytes());
        response.extend_from_slice(&[
            INTERFACE_VERSION,
            major,
            minor,
            build,
            capability::WINK | capability::CBOR,
        ]);
        Ok(response)
    }
}

impl Default for CtapHidHandler {
    fn default() -> Self {
        Self::new()
    }
}
