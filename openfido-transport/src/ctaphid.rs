//! CTAPHID framing
//!
//! A message travels as one initialization frame followed by continuation
//! frames, each a fixed 64-byte HID report:
//!
//! - initialization: `CID(4) | CMD(1, high bit set) | BCNT(2, BE) | DATA(57)`
//! - continuation: `CID(4) | SEQ(1, high bit clear) | DATA(59)`
//!
//! Sequence numbers start at 0 and wrap modulo 0x80.

use crate::error::{Error, Result};

/// HID report size
pub const PACKET_SIZE: usize = 64;

/// Largest message the framing can carry: 57 + 128 * 59
pub const MAX_MESSAGE_SIZE: usize = 7609;

/// Channel used for `INIT` negotiation
pub const BROADCAST_CID: u32 = 0xFFFF_FFFF;

pub(crate) const INIT_DATA_SIZE: usize = PACKET_SIZE - 7;
pub(crate) const CONT_DATA_SIZE: usize = PACKET_SIZE - 5;

/// Set on the command byte of every initialization frame
pub const TYPE_INIT: u8 = 0x80;

/// CTAPHID interface version reported by `INIT`
pub const INTERFACE_VERSION: u8 = 2;

/// Capability flags reported by `INIT`
pub mod capability {
    pub const WINK: u8 = 0x01;
    pub const CBOR: u8 = 0x04;
    /// Set when `MSG` is *not* implemented
    pub const NMSG: u8 = 0x08;
}

/// CTAPHID commands, without the frame type bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    Ping = 0x01,
    /// CTAP1/U2F APDU
    Msg = 0x03,
    Lock = 0x04,
    Init = 0x06,
    Wink = 0x08,
    /// CTAP2 request: command byte followed by CBOR
    Cbor = 0x10,
    Cancel = 0x11,
    Keepalive = 0x3B,
    Sync = 0x3C,
    Error = 0x3F,
}

impl Cmd {
    /// Decode a command byte; the frame type bit is ignored
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & !TYPE_INIT {
            0x01 => Some(Cmd::Ping),
            0x03 => Some(Cmd::Msg),
            0x04 => Some(Cmd::Lock),
            0x06 => Some(Cmd::Init),
            0x08 => Some(Cmd::Wink),
            0x10 => Some(Cmd::Cbor),
            0x11 => Some(Cmd::Cancel),
            0x3B => Some(Cmd::Keepalive),
            0x3C => Some(Cmd::Sync),
            0x3F => Some(Cmd::Error),
            _ => None,
        }
    }

    /// Command byte as it appears in an initialization frame
    pub fn to_u8_init(self) -> u8 {
        (self as u8) | TYPE_INIT
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Low-level error codes carried by an `ERROR` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0x00,
    InvalidCmd = 0x01,
    InvalidPar = 0x02,
    InvalidLen = 0x03,
    InvalidSeq = 0x04,
    MsgTimeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0A,
    SyncFail = 0x0B,
    Other = 0x7F,
}

impl ErrorCode {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// One 64-byte HID report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: [u8; PACKET_SIZE],
}

impl Packet {
    pub fn from_bytes(data: [u8; PACKET_SIZE]) -> Self {
        Self { data }
    }

    /// Wrap a report read from the link; anything but 64 bytes is rejected
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let data: [u8; PACKET_SIZE] = data.try_into().map_err(|_| Error::InvalidPacket)?;
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    pub fn cid(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    pub fn is_init(&self) -> bool {
        self.data[4] & TYPE_INIT != 0
    }

    /// Raw command byte of an initialization frame, type bit cleared
    pub fn raw_cmd(&self) -> Option<u8> {
        self.is_init().then_some(self.data[4] & !TYPE_INIT)
    }

    pub fn cmd(&self) -> Option<Cmd> {
        self.raw_cmd().and_then(Cmd::from_u8)
    }

    /// Declared message length of an initialization frame
    pub fn payload_len(&self) -> Option<u16> {
        self.is_init()
            .then(|| u16::from_be_bytes([self.data[5], self.data[6]]))
    }

    /// Sequence number of a continuation frame
    pub fn seq(&self) -> Option<u8> {
        (!self.is_init()).then_some(self.data[4])
    }

    pub fn payload(&self) -> &[u8] {
        if self.is_init() {
            &self.data[7..]
        } else {
            &self.data[5..]
        }
    }

    /// Single-frame `ERROR` response
    pub fn error(cid: u32, code: ErrorCode) -> Self {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0..4].copy_from_slice(&cid.to_be_bytes());
        packet[4] = Cmd::Error.to_u8_init();
        packet[5..7].copy_from_slice(&1u16.to_be_bytes());
        packet[7] = code.to_u8();
        Packet::from_bytes(packet)
    }
}

/// A complete CTAPHID message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u32,
    pub cmd: Cmd,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(cid: u32, cmd: Cmd, data: Vec<u8>) -> Self {
        Self { cid, cmd, data }
    }

    /// Split into an initialization frame and as many continuation frames as
    /// the payload needs; unused bytes are zero
    pub fn to_packets(&self) -> Result<Vec<Packet>> {
        if self.data.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let cid = self.cid.to_be_bytes();
        let (first, mut rest) = self
            .data
            .split_at(self.data.len().min(INIT_DATA_SIZE));

        let mut init = [0u8; PACKET_SIZE];
        init[0..4].copy_from_slice(&cid);
        init[4] = self.cmd.to_u8_init();
        init[5..7].copy_from_slice(&(self.data.len() as u16).to_be_bytes());
        init[7..7 + first.len()].copy_from_slice(first);

        let mut packets = Vec::with_capacity(1 + rest.len().div_ceil(CONT_DATA_SIZE));
        packets.push(Packet::from_bytes(init));

        let mut seq = 0u8;
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rest.len().min(CONT_DATA_SIZE));
            let mut cont = [0u8; PACKET_SIZE];
            cont[0..4].copy_from_slice(&cid);
            cont[4] = seq;
            cont[5..5 + chunk.len()].copy_from_slice(chunk);
            packets.push(Packet::from_bytes(cont));

            seq = (seq + 1) & !TYPE_INIT;
            rest = tail;
        }

        Ok(packets)
    }

    /// Reassemble a message from a complete frame sequence
    pub fn from_packets(packets: &[Packet]) -> Result<Self> {
        let (first, rest) = packets.split_first().ok_or(Error::InvalidPacket)?;
        let mut assembler = Assembler::start(first)?;
        for packet in rest {
            if assembler.is_complete() {
                break;
            }
            assembler.push(packet)?;
        }
        if !assembler.is_complete() {
            return Err(Error::InvalidLength);
        }
        assembler.finish()
    }
}

/// Reassembly of one message from its frames
#[derive(Debug)]
pub struct Assembler {
    cid: u32,
    cmd: u8,
    total: usize,
    data: Vec<u8>,
    next_seq: u8,
}

impl Assembler {
    /// Begin with an initialization frame
    ///
    /// A continuation frame with no preceding initialization frame is
    /// `InvalidCommand`.
    pub fn start(packet: &Packet) -> Result<Self> {
        let (Some(cmd), Some(total)) = (packet.raw_cmd(), packet.payload_len()) else {
            return Err(Error::InvalidCommand);
        };
        let total = usize::from(total);
        if total > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidLength);
        }

        let mut data = Vec::with_capacity(total);
        data.extend_from_slice(&packet.payload()[..total.min(INIT_DATA_SIZE)]);

        Ok(Self {
            cid: packet.cid(),
            cmd,
            total,
            data,
            next_seq: 0,
        })
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    /// Accept the next continuation frame
    ///
    /// Frames for another channel are `InvalidChannel` and leave the
    /// assembler untouched; the caller decides whether to skip them. An
    /// initialization frame or an out-of-order sequence number is
    /// `InvalidSequence`.
    pub fn push(&mut self, packet: &Packet) -> Result<()> {
        if packet.cid() != self.cid {
            return Err(Error::InvalidChannel);
        }
        let seq = packet.seq().ok_or(Error::InvalidSequence)?;
        if seq != self.next_seq {
            log::debug!("seq {seq}, expected {}", self.next_seq);
            return Err(Error::InvalidSequence);
        }

        let take = (self.total - self.data.len()).min(CONT_DATA_SIZE);
        self.data.extend_from_slice(&packet.payload()[..take]);
        self.next_seq = (self.next_seq + 1) & !TYPE_INIT;
        Ok(())
    }

    /// True once exactly the declared number of bytes has arrived
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.total
    }

    /// Finish a complete message; an unknown command is `InvalidCommand`
    pub fn finish(self) -> Result<Message> {
        let cmd = Cmd::from_u8(self.cmd).ok_or(Error::InvalidCommand)?;
        Ok(Message {
            cid: self.cid,
            cmd,
            data: self.data,
        })
    }
}
