//! BLE GATT transport
//!
//! Requests arrive as writes to the control point characteristic, responses
//! leave as notifications on the status characteristic. Frames carry no
//! channel id; one request is reassembled per connection at a time.
//!
//! - initial: `CMD(1, high bit set) | HLEN | LLEN | DATA`
//! - continuation: `SEQ(1, high bit clear) | DATA`

use std::time::Duration;

use crate::ctaphid::{Cmd, ErrorCode, MAX_MESSAGE_SIZE, TYPE_INIT};
use crate::error::{Error, Result};
use crate::handler::{CommandHandler, RequestChannel};
use crate::transport::Transport;

/// BLE command bytes, type bit included
pub mod cmd {
    pub const PING: u8 = 0x81;
    pub const KEEPALIVE: u8 = 0x82;
    pub const MSG: u8 = 0x83;
    pub const CANCEL: u8 = 0xBE;
    pub const ERROR: u8 = 0xBF;
}

/// Status byte of a `KEEPALIVE` frame
pub mod keepalive_status {
    pub const PROCESSING: u8 = 0x01;
    pub const UP_NEEDED: u8 = 0x02;
}

const INIT_HEADER: usize = 3;
const CONT_HEADER: usize = 1;

/// A fully reassembled request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleRequest {
    pub cmd: u8,
    pub data: Vec<u8>,
}

/// What a control point write produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// More fragments are needed
    Pending,
    /// A request is ready for dispatch
    Ready,
    /// The host asked to abort the request in progress
    Cancel,
}

#[derive(Debug)]
struct PendingRequest {
    cmd: u8,
    length: u16,
    data: Vec<u8>,
}

/// Per-connection reassembly state
#[derive(Debug, Default)]
pub struct BleSession {
    waiting_for_continuation: bool,
    ready_for_dispatch: bool,
    receive_offset: u16,
    expected_sequence: u8,
    pending: Option<PendingRequest>,
}

impl BleSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting_for_continuation
    }

    pub fn is_ready(&self) -> bool {
        self.ready_for_dispatch
    }

    /// Feed one control point write
    ///
    /// On `Err` the session has already been cleared; the caller answers
    /// with an `ERROR` frame.
    pub fn on_control_point_write(&mut self, frame: &[u8]) -> Result<WriteOutcome> {
        let result = self.accept(frame);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn accept(&mut self, frame: &[u8]) -> Result<WriteOutcome> {
        let (&first, rest) = frame.split_first().ok_or(Error::InvalidLength)?;
        let in_progress = self.waiting_for_continuation && !self.ready_for_dispatch;

        if first & TYPE_INIT != 0 {
            if first == cmd::CANCEL {
                return Ok(WriteOutcome::Cancel);
            }
            if in_progress {
                log::warn!("initial fragment while reassembling");
                return Err(Error::InvalidSequence);
            }
            let [hi, lo, data @ ..] = rest else {
                return Err(Error::InvalidLength);
            };
            let length = u16::from_be_bytes([*hi, *lo]);
            if usize::from(length) > MAX_MESSAGE_SIZE {
                return Err(Error::InvalidLength);
            }

            let take = data.len().min(usize::from(length));
            let mut buffer = Vec::with_capacity(usize::from(length));
            buffer.extend_from_slice(&data[..take]);

            self.pending = Some(PendingRequest {
                cmd: first,
                length,
                data: buffer,
            });
            self.receive_offset = take as u16;
            self.expected_sequence = 0;
            self.waiting_for_continuation = true;
        } else {
            if !in_progress {
                log::warn!("continuation without a request in progress");
                return Err(Error::InvalidSequence);
            }
            if first != self.expected_sequence {
                log::warn!("sequence {first}, expected {}", self.expected_sequence);
                return Err(Error::InvalidSequence);
            }
            let pending = self.pending.as_mut().ok_or(Error::InvalidSequence)?;
            let take = rest
                .len()
                .min(usize::from(pending.length - self.receive_offset));
            pending.data.extend_from_slice(&rest[..take]);

            self.receive_offset += take as u16;
            self.expected_sequence = (self.expected_sequence + 1) & !TYPE_INIT;
        }

        self.ready_for_dispatch = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.length == self.receive_offset);

        Ok(if self.ready_for_dispatch {
            WriteOutcome::Ready
        } else {
            WriteOutcome::Pending
        })
    }

    /// Hand over the assembled request and reset the session
    pub fn take_request(&mut self) -> Option<BleRequest> {
        if !self.ready_for_dispatch {
            return None;
        }
        let pending = self.pending.take();
        self.clear();
        pending.map(|pending| BleRequest {
            cmd: pending.cmd,
            data: pending.data,
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Split a response into notification-sized frames
///
/// `frame_size` is the usable notification length; it must leave room for
/// at least one data byte after the initial header.
pub fn encode_frames(cmd: u8, data: &[u8], frame_size: usize) -> Result<Vec<Vec<u8>>> {
    if frame_size <= INIT_HEADER {
        return Err(Error::InvalidLength);
    }
    let length = u16::try_from(data.len()).map_err(|_| Error::MessageTooLarge)?;

    let (first, mut rest) = data.split_at(data.len().min(frame_size - INIT_HEADER));
    let mut frame = Vec::with_capacity(INIT_HEADER + first.len());
    frame.push(cmd | TYPE_INIT);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(first);

    let mut frames = vec![frame];
    let mut seq = 0u8;
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(frame_size - CONT_HEADER));
        let mut frame = Vec::with_capacity(CONT_HEADER + chunk.len());
        frame.push(seq);
        frame.extend_from_slice(chunk);
        frames.push(frame);

        seq = (seq + 1) & !TYPE_INIT;
        rest = tail;
    }
    Ok(frames)
}

/// GATT side of a BLE connection
pub trait BleLink {
    /// Wait up to `timeout` for the next control point write
    fn read_write(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Queue one status notification
    fn notify(&mut self, frame: &[u8]) -> Result<()>;

    /// True once every queued notification has gone out
    fn notifications_done(&mut self) -> bool;

    /// Usable notification length: effective ATT MTU minus the ATT header
    fn frame_size(&self) -> usize;

    /// Low-power wait while a notification is in flight
    fn idle(&mut self) {}
}

/// The GATT link as seen by a request in flight
///
/// Keepalives leave as status notifications. Control point writes other
/// than CANCEL are dropped until the response has gone out.
struct ControlPoint<'a, L: BleLink> {
    link: &'a mut L,
}

impl<L: BleLink> RequestChannel for ControlPoint<'_, L> {
    fn keepalive(&mut self, status: u8) -> Result<()> {
        for frame in encode_frames(cmd::KEEPALIVE, &[status], self.link.frame_size())? {
            self.link.notify(&frame)?;
        }
        Ok(())
    }

    fn cancel_requested(&mut self) -> Result<bool> {
        while let Some(frame) = self.link.read_write(Duration::ZERO)? {
            if frame.first() == Some(&cmd::CANCEL) {
                log::debug!("BLE cancel during request");
                return Ok(true);
            }
            log::debug!("control point write dropped, request in progress");
        }
        Ok(false)
    }
}

pub struct BleTransport<L: BleLink> {
    link: L,
    session: BleSession,
    poll_timeout: Duration,
}

impl<L: BleLink> BleTransport<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            session: BleSession::new(),
            poll_timeout: Duration::from_millis(10),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn session(&self) -> &BleSession {
        &self.session
    }

    /// Send a response
    ///
    /// With `wait_complete` the call returns only after the last
    /// notification has been transmitted.
    pub fn send(&mut self, cmd: u8, data: &[u8], wait_complete: bool) -> Result<()> {
        for frame in encode_frames(cmd, data, self.link.frame_size())? {
            self.link.notify(&frame)?;
        }
        if wait_complete {
            while !self.link.notifications_done() {
                self.link.idle();
            }
        }
        Ok(())
    }

    pub fn keepalive(&mut self, status: u8) -> Result<()> {
        ControlPoint {
            link: &mut self.link,
        }
        .keepalive(status)
    }

    fn send_error(&mut self, code: ErrorCode) -> Result<()> {
        self.send(cmd::ERROR, &[code.to_u8()], false)
    }

    fn dispatch(&mut self, request: BleRequest, handler: &mut dyn CommandHandler) -> Result<()> {
        match request.cmd {
            cmd::PING => self.send(cmd::PING, &request.data, true),
            cmd::MSG => {
                // U2F APDUs start with CLA 0x00; CTAP2 requests with a
                // non-zero command byte
                let kind = match request.data.first() {
                    Some(0x00) => Cmd::Msg,
                    _ => Cmd::Cbor,
                };
                let mut channel = ControlPoint {
                    link: &mut self.link,
                };
                channel.keepalive(keepalive_status::PROCESSING)?;
                match handler.handle_request(kind, &request.data, &mut channel) {
                    Ok(response) => self.send(cmd::MSG, &response, true),
                    Err(err) => {
                        log::warn!("BLE request failed: {err}");
                        self.send_error(err.to_error_code())
                    }
                }
            }
            other => {
                log::warn!("unknown BLE command {other:#04x}");
                self.send_error(ErrorCode::InvalidCmd)
            }
        }
    }
}

impl<L: BleLink> Transport for BleTransport<L> {
    fn name(&self) -> &'static str {
        "ble"
    }

    fn poll(&mut self, handler: &mut dyn CommandHandler) -> Result<()> {
        let Some(frame) = self.link.read_write(self.poll_timeout)? else {
            return Ok(());
        };

        match self.session.on_control_point_write(&frame) {
            Ok(WriteOutcome::Pending) => Ok(()),
            Ok(WriteOutcome::Cancel) => {
                log::debug!("BLE cancel");
                handler.cancel();
                Ok(())
            }
            Ok(WriteOutcome::Ready) => match self.session.take_request() {
                Some(request) => self.dispatch(request, handler),
                None => Ok(()),
            },
            Err(err) => self.send_error(err.to_error_code()),
        }
    }
}
