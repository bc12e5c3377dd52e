//! USB HID transport
//!
//! Reads reports from a [`HidLink`], reassembles one message per poll and
//! writes the response frames back before returning.

use std::time::{Duration, Instant};

use crate::ctaphid::{Assembler, Cmd, ErrorCode, Message, PACKET_SIZE, Packet};
use crate::error::{Error, Result};
use crate::handler::{CommandHandler, CtapHidHandler, RequestChannel};
use crate::transport::Transport;

/// Time allowed between the frames of one message
pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(1);

/// A source and sink of 64-byte HID reports
pub trait HidLink {
    /// Wait up to `timeout` for the next output report from the host
    fn read_report(&mut self, timeout: Duration) -> Result<Option<[u8; PACKET_SIZE]>>;

    /// Send one input report to the host
    fn write_report(&mut self, report: &[u8; PACKET_SIZE]) -> Result<()>;
}

/// The HID link as seen by a request running on `cid`
///
/// Other channels get `ERROR(CHANNEL_BUSY)` for every new message until the
/// request finishes.
struct BusyChannel<'a, L: HidLink> {
    link: &'a mut L,
    cid: u32,
}

impl<L: HidLink> BusyChannel<'_, L> {
    fn write(&mut self, packets: &[Packet]) -> Result<()> {
        packets
            .iter()
            .try_for_each(|packet| self.link.write_report(packet.as_bytes()))
    }
}

impl<L: HidLink> RequestChannel for BusyChannel<'_, L> {
    fn keepalive(&mut self, status: u8) -> Result<()> {
        let packets = Message::new(self.cid, Cmd::Keepalive, vec![status]).to_packets()?;
        self.write(&packets)
    }

    fn cancel_requested(&mut self) -> Result<bool> {
        while let Some(report) = self.link.read_report(Duration::ZERO)? {
            let packet = Packet::from_bytes(report);
            let Some(cmd) = packet.cmd() else {
                continue;
            };
            if packet.cid() != self.cid {
                log::debug!("{cmd:?} on {:#010x} while busy", packet.cid());
                self.write(&[Packet::error(packet.cid(), ErrorCode::ChannelBusy)])?;
            } else if cmd == Cmd::Cancel {
                return Ok(true);
            } else {
                log::debug!("{cmd:?} dropped, request in progress");
            }
        }
        Ok(false)
    }
}

enum Received {
    Nothing,
    Message(Message),
    Failed(u32, Error),
}

pub struct HidTransport<L: HidLink> {
    link: L,
    hid: CtapHidHandler,
    poll_timeout: Duration,
    message_timeout: Duration,
}

impl<L: HidLink> HidTransport<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            hid: CtapHidHandler::new(),
            poll_timeout: Duration::from_millis(10),
            message_timeout: MESSAGE_TIMEOUT,
        }
    }

    /// How long a poll waits for the first frame
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn handler(&self) -> &CtapHidHandler {
        &self.hid
    }

    /// Read one message
    ///
    /// Frames from other channels arriving mid-message are dropped. Running
    /// out of time between frames is `Timeout`.
    fn receive(&mut self) -> Result<Received> {
        let Some(first) = self.link.read_report(self.poll_timeout)? else {
            return Ok(Received::Nothing);
        };
        let first = Packet::from_bytes(first);
        let cid = first.cid();

        let mut assembler = match Assembler::start(&first) {
            Ok(assembler) => assembler,
            Err(err) => return Ok(Received::Failed(cid, err)),
        };

        let deadline = Instant::now() + self.message_timeout;
        while !assembler.is_complete() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Received::Failed(cid, Error::Timeout));
            }
            let Some(report) = self.link.read_report(remaining)? else {
                continue;
            };
            match assembler.push(&Packet::from_bytes(report)) {
                Ok(()) => {}
                Err(Error::InvalidChannel) => {
                    log::debug!("dropping frame for another channel");
                }
                Err(err) => return Ok(Received::Failed(cid, err)),
            }
        }

        Ok(match assembler.finish() {
            Ok(message) => Received::Message(message),
            Err(err) => Received::Failed(cid, err),
        })
    }

    fn send(&mut self, packets: &[Packet]) -> Result<()> {
        packets
            .iter()
            .try_for_each(|packet| self.link.write_report(packet.as_bytes()))
    }
}

impl<L: HidLink> Transport for HidTransport<L> {
    fn name(&self) -> &'static str {
        "hid"
    }

    fn poll(&mut self, handler: &mut dyn CommandHandler) -> Result<()> {
        let response = match self.receive()? {
            Received::Nothing => Vec::new(),
            Received::Message(message) => {
                let mut channel = BusyChannel {
                    link: &mut self.link,
                    cid: message.cid,
                };
                self.hid
                    .process_message(message, handler, &mut channel, Instant::now())
            }
            Received::Failed(cid, err) => {
                log::warn!("framing error on {cid:#010x}: {err}");
                vec![Packet::error(cid, err.to_error_code())]
            }
        };
        self.send(&response)?;
        self.hid.evict_idle(Instant::now());
        Ok(())
    }
}
