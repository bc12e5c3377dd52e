//! NFC ISO 7816-4 APDU layer
//!
//! Every command APDU is decoded, accumulated (command chaining) and then
//! dispatched on its instruction byte. Responses larger than one frame are
//! buffered and drained with `61XX` / `GET RESPONSE`.

use std::time::Duration;

use crate::ctaphid::{Cmd, MAX_MESSAGE_SIZE};
use crate::error::{Error, Result};
use crate::handler::CommandHandler;
use crate::transport::Transport;

/// ISO 7816 status words
pub mod sw {
    pub const SUCCESS: u16 = 0x9000;
    pub const BYTES_REMAINING: u16 = 0x6100;
    pub const WRONG_LENGTH: u16 = 0x6700;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const INCORRECT_P1P2: u16 = 0x6A86;
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;
    pub const EXECUTION_ERROR: u16 = 0x6F00;
}

/// Instruction bytes
pub mod ins {
    pub const U2F_REGISTER: u8 = 0x01;
    pub const U2F_AUTHENTICATE: u8 = 0x02;
    pub const U2F_VERSION: u8 = 0x03;
    pub const NFCCTAP_MSG: u8 = 0x10;
    pub const SELECT: u8 = 0xA4;
    pub const READ_BINARY: u8 = 0xB0;
    pub const GET_RESPONSE: u8 = 0xC0;
}

pub const AID_FIDO: &[u8] = &[0xA0, 0x00, 0x00, 0x06, 0x47, 0x2F, 0x00, 0x01];
pub const AID_NDEF_TYPE_4: &[u8] = &[0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
pub const AID_CAPABILITY_CONTAINER: &[u8] = &[0xE1, 0x03];
pub const AID_NDEF_TAG: &[u8] = &[0xE1, 0x04];

/// NFC Forum type 4 capability container file
pub const CC_FILE: [u8; 15] = [
    0x00, 0x0F, 0x20, 0x00, 0x7F, 0x00, 0x7F, 0x04, 0x06, 0xE1, 0x04, 0x00, 0x7F, 0x00, 0x00,
];

/// NDEF file holding one URI record
const NDEF_SAMPLE: &[u8] = b"\x00\x11\xD1\x01\x0D\x55\x04openfido.dev";

const SELECT_FIDO_RESPONSE: &[u8] = b"FIDO_2_0";

/// Chunk size when the reader leaves Le open
const DEFAULT_CHUNK: usize = 253;

const CLA_CHAINING: u8 = 0x10;

/// The six ISO 7816 cases, as told apart by length alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaseType {
    /// Header only
    NoData = 0x01,
    /// Le
    ShortLe = 0x02,
    /// Lc, data
    ShortLc = 0x03,
    /// Lc, data, Le
    ShortLcLe = 0x04,
    /// Extended Le
    ExtendedLe = 0x12,
    /// Extended Lc, data
    ExtendedLc = 0x13,
    /// Extended Lc, data, two-byte Le
    ExtendedLcLe = 0x14,
    /// Extended Lc, data, Le with a leading zero byte
    ExtendedLcLe3 = 0x24,
}

/// A decoded command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu<'a> {
    /// Class byte with the chaining bit masked off
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub case_type: CaseType,
    pub extended: bool,
    /// Chaining bit of the raw class byte
    pub chained: bool,
    /// Expected response length; 0 when absent
    pub le: usize,
    pub data: &'a [u8],
}

impl<'a> Apdu<'a> {
    /// Classify and split a raw command APDU
    ///
    /// Later patterns take precedence over earlier ones, so a buffer that
    /// fits more than one shape is read as the longest case.
    pub fn decode(raw: &'a [u8]) -> Result<Self> {
        let [cla, instruction, p1, p2, body @ ..] = raw else {
            return Err(Error::InvalidPacket);
        };
        let len = raw.len();
        let b0 = usize::from(body.first().copied().unwrap_or(0));
        let or_max = |le: usize, max: usize| if le == 0 { max } else { le };

        let mut decoded: Option<(CaseType, usize, usize)> = None;

        if len == 4 {
            decoded = Some((CaseType::NoData, 0, 0));
        }
        if len == 5 {
            decoded = Some((CaseType::ShortLe, 0, or_max(b0, 0x100)));
        }
        if b0 != 0 && len == 5 + b0 {
            decoded = Some((CaseType::ShortLc, b0, 0));
        }
        if b0 != 0 && len == 5 + b0 + 1 {
            let le = usize::from(raw[len - 1]);
            decoded = Some((CaseType::ShortLcLe, b0, or_max(le, 0x100)));
        }

        if b0 == 0 && len >= 7 {
            let extlen = usize::from(u16::from_be_bytes([raw[5], raw[6]]));
            let tail_le = || usize::from(u16::from_be_bytes([raw[len - 2], raw[len - 1]]));

            if len == 7 {
                decoded = Some((CaseType::ExtendedLe, 0, or_max(extlen, 0x10000)));
            }
            if extlen != 0 && len == 7 + extlen {
                decoded = Some((CaseType::ExtendedLc, extlen, 0));
            }
            if len == 7 + extlen + 2 {
                decoded = Some((CaseType::ExtendedLcLe, extlen, or_max(tail_le(), 0x10000)));
            }
            if len == 7 + extlen + 3 && raw[len - 3] == 0 {
                decoded = Some((CaseType::ExtendedLcLe3, extlen, or_max(tail_le(), 0x10000)));
            }
        }

        let (case_type, lc, le) = decoded.ok_or(Error::InvalidPacket)?;
        let extended = matches!(
            case_type,
            CaseType::ExtendedLe
                | CaseType::ExtendedLc
                | CaseType::ExtendedLcLe
                | CaseType::ExtendedLcLe3
        );
        let offset = if extended { 7 } else { 5 };
        let data = if lc == 0 { &[][..] } else { &raw[offset..offset + lc] };

        Ok(Self {
            cla: cla & !CLA_CHAINING,
            ins: *instruction,
            p1: *p1,
            p2: *p2,
            case_type,
            extended,
            chained: cla & CLA_CHAINING != 0,
            le,
            data,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applet {
    Fido,
    NdefType4,
    CapabilityContainer,
    NdefTag,
}

impl Applet {
    const ALL: [(Applet, &'static [u8]); 4] = [
        (Applet::Fido, AID_FIDO),
        (Applet::NdefType4, AID_NDEF_TYPE_4),
        (Applet::CapabilityContainer, AID_CAPABILITY_CONTAINER),
        (Applet::NdefTag, AID_NDEF_TAG),
    ];

    /// Find the installed applet an AID names
    pub fn select(aid: &[u8]) -> Option<Applet> {
        Self::ALL
            .iter()
            .find(|(_, installed)| aid_matches(aid, installed))
            .map(|(applet, _)| *applet)
    }
}

/// RID/PIX comparison
///
/// International AIDs (RID category `A`) match on any prefix of at least the
/// five RID bytes; proprietary AIDs must match exactly.
fn aid_matches(aid: &[u8], installed: &[u8]) -> bool {
    if aid.len() > installed.len() {
        return false;
    }
    if installed[0] & 0xF0 == 0xA0 {
        aid.len() >= 5 && installed.starts_with(aid)
    } else {
        aid == installed
    }
}

fn status(word: u16) -> Vec<u8> {
    word.to_be_bytes().to_vec()
}

fn with_status(data: &[u8], word: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.extend_from_slice(data);
    out.extend_from_slice(&word.to_be_bytes());
    out
}

/// Bytes to send for one response frame
fn chunk_len(le: usize, extended: bool, left: usize) -> usize {
    let wanted = match le {
        _ if extended => left,
        1..=0xFF => le,
        _ => DEFAULT_CHUNK,
    };
    wanted.min(left)
}

/// Per-field APDU state
#[derive(Debug, Default)]
pub struct NfcSession {
    selected: Option<Applet>,
    dispatch: Vec<u8>,
    response: Vec<u8>,
    response_offset: usize,
}

impl NfcSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<Applet> {
        self.selected
    }

    /// Bytes of a buffered response not yet collected
    pub fn pending_response(&self) -> usize {
        self.response.len() - self.response_offset
    }

    /// A reader entered the field
    pub fn on_field_on(&mut self) {
        log::info!("NFC field on");
        self.clean();
    }

    pub fn on_field_off(&mut self) {
        log::info!("NFC field lost");
    }

    /// Forget the selection and both buffers
    pub fn clean(&mut self) {
        self.selected = None;
        self.clean_dispatch();
        self.clean_response();
    }

    fn clean_dispatch(&mut self) {
        self.dispatch.clear();
    }

    fn clean_response(&mut self) {
        self.response = Vec::new();
        self.response_offset = 0;
    }

    fn fail(&mut self, word: u16) -> Vec<u8> {
        self.clean();
        status(word)
    }

    /// Answer one command APDU with one response APDU
    pub fn process_apdu(&mut self, raw: &[u8], handler: &mut dyn CommandHandler) -> Vec<u8> {
        let apdu = match Apdu::decode(raw) {
            Ok(apdu) => apdu,
            Err(_) => {
                log::warn!("undecodable APDU of {} bytes", raw.len());
                return self.fail(sw::INS_NOT_SUPPORTED);
            }
        };
        log::debug!(
            "APDU {:?} cla={:02x} ins={:02x} p1={:02x} p2={:02x} lc={} le={}",
            apdu.case_type,
            apdu.cla,
            apdu.ins,
            apdu.p1,
            apdu.p2,
            apdu.data.len(),
            apdu.le
        );

        if self.dispatch.len() + apdu.data.len() > MAX_MESSAGE_SIZE {
            log::warn!("chained APDU payload too large");
            return self.fail(sw::WRONG_LENGTH);
        }
        self.dispatch.extend_from_slice(apdu.data);

        if apdu.chained {
            return status(sw::SUCCESS);
        }

        let response = self.dispatch_apdu(&apdu, handler);
        self.clean_dispatch();
        response
    }

    fn dispatch_apdu(&mut self, apdu: &Apdu<'_>, handler: &mut dyn CommandHandler) -> Vec<u8> {
        if apdu.cla != 0x00 && apdu.cla != 0x80 {
            log::warn!("unsupported CLA {:#04x}", apdu.cla);
            return self.fail(sw::CLA_NOT_SUPPORTED);
        }

        match apdu.ins {
            ins::GET_RESPONSE => self.get_response(apdu),
            ins::SELECT => self.select(),
            ins::NFCCTAP_MSG => self.ctap_msg(apdu, handler),
            ins::U2F_REGISTER | ins::U2F_AUTHENTICATE | ins::U2F_VERSION => {
                self.u2f_msg(apdu, handler)
            }
            ins::READ_BINARY => self.read_binary(apdu),
            other => {
                log::warn!("unknown INS {other:#04x}");
                self.fail(sw::INS_NOT_SUPPORTED)
            }
        }
    }

    fn select(&mut self) -> Vec<u8> {
        match Applet::select(&self.dispatch) {
            Some(Applet::Fido) => {
                self.selected = Some(Applet::Fido);
                log::info!("FIDO applet selected");
                with_status(SELECT_FIDO_RESPONSE, sw::SUCCESS)
            }
            Some(applet) => {
                self.selected = Some(applet);
                log::info!("{applet:?} applet selected");
                status(sw::SUCCESS)
            }
            None => {
                log::debug!("no applet for AID {:02x?}", self.dispatch);
                status(sw::FILE_NOT_FOUND)
            }
        }
    }

    fn ctap_msg(&mut self, apdu: &Apdu<'_>, handler: &mut dyn CommandHandler) -> Vec<u8> {
        if self.selected != Some(Applet::Fido) {
            return self.fail(sw::INS_NOT_SUPPORTED);
        }

        let response = match handler.handle_command(Cmd::Cbor, &self.dispatch) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("CTAP request failed: {err}");
                return self.fail(sw::EXECUTION_ERROR);
            }
        };
        log::debug!("CTAP response of {} bytes", response.len());

        // the CBOR reply already leads with the CTAP status byte
        self.respond(with_status(&response, sw::SUCCESS), apdu)
    }

    fn u2f_msg(&mut self, apdu: &Apdu<'_>, handler: &mut dyn CommandHandler) -> Vec<u8> {
        if self.selected != Some(Applet::Fido) {
            return self.fail(sw::INS_NOT_SUPPORTED);
        }

        let mut request = vec![apdu.cla, apdu.ins, apdu.p1, apdu.p2];
        if !self.dispatch.is_empty() {
            let Ok(len) = u16::try_from(self.dispatch.len()) else {
                return self.fail(sw::WRONG_LENGTH);
            };
            request.push(0);
            request.extend_from_slice(&len.to_be_bytes());
            request.extend_from_slice(&self.dispatch);
        }

        match handler.handle_command(Cmd::Msg, &request) {
            Ok(response) => self.respond(response, apdu),
            Err(err) => {
                log::warn!("U2F request failed: {err}");
                self.fail(sw::EXECUTION_ERROR)
            }
        }
    }

    /// Buffer a full response (status word included) and send its first chunk
    fn respond(&mut self, response: Vec<u8>, apdu: &Apdu<'_>) -> Vec<u8> {
        self.response = response;
        self.response_offset = 0;
        self.next_chunk(chunk_len(apdu.le, apdu.extended, self.response.len()))
    }

    fn get_response(&mut self, apdu: &Apdu<'_>) -> Vec<u8> {
        if apdu.p1 != 0 || apdu.p2 != 0 {
            log::warn!("GET RESPONSE with P1/P2 set");
            return self.fail(sw::INCORRECT_P1P2);
        }

        let left = self.pending_response();
        if left == 0 {
            return status(sw::CONDITIONS_NOT_SATISFIED);
        }
        if apdu.le != 0 && apdu.le != 0x100 && apdu.le > left {
            log::warn!("GET RESPONSE asks for {} of {left} bytes", apdu.le);
            let word = match u8::try_from(left) {
                Ok(left) => sw::WRONG_LENGTH | u16::from(left),
                Err(_) => sw::WRONG_LENGTH,
            };
            return status(word);
        }

        self.next_chunk(chunk_len(apdu.le, apdu.extended, left))
    }

    fn next_chunk(&mut self, len: usize) -> Vec<u8> {
        let start = self.response_offset;
        let mut out = self.response[start..start + len].to_vec();
        self.response_offset += len;

        let left = self.pending_response();
        if left == 0 {
            self.clean_response();
        } else {
            let xx = u8::try_from(left).unwrap_or(0);
            out.extend_from_slice(&(sw::BYTES_REMAINING | u16::from(xx)).to_be_bytes());
        }
        out
    }

    fn read_binary(&mut self, apdu: &Apdu<'_>) -> Vec<u8> {
        let file: &[u8] = match self.selected {
            Some(Applet::CapabilityContainer) => &CC_FILE,
            Some(Applet::NdefTag) => NDEF_SAMPLE,
            _ => {
                log::warn!("READ BINARY without a file selected");
                return status(sw::FILE_NOT_FOUND);
            }
        };
        let len = match apdu.le {
            0 => file.len(),
            le => le.min(file.len()),
        };
        with_status(&file[..len], sw::SUCCESS)
    }
}

/// Something the NFC frontend reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NfcEvent {
    FieldOn,
    FieldOff,
    Apdu(Vec<u8>),
}

/// Type 4 tag frontend
pub trait NfcLink {
    /// Wait up to `timeout` for the next frontend event
    fn next_event(&mut self, timeout: Duration) -> Result<Option<NfcEvent>>;

    /// Transmit one response APDU
    fn send_response(&mut self, response: &[u8]) -> Result<()>;
}

pub struct NfcTransport<L: NfcLink> {
    link: L,
    session: NfcSession,
    poll_timeout: Duration,
}

impl<L: NfcLink> NfcTransport<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            session: NfcSession::new(),
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

    pub fn session(&self) -> &NfcSession {
        &self.session
    }
}

impl<L: NfcLink> Transport for NfcTransport<L> {
    fn name(&self) -> &'static str {
        "nfc"
    }

    fn poll(&mut self, handler: &mut dyn CommandHandler) -> Result<()> {
        match self.link.next_event(self.poll_timeout)? {
            None => Ok(()),
            Some(NfcEvent::FieldOn) => {
                self.session.on_field_on();
                Ok(())
            }
            Some(NfcEvent::FieldOff) => {
                self.session.on_field_off();
                Ok(())
            }
            Some(NfcEvent::Apdu(raw)) => {
                let response = self.session.process_apdu(&raw, handler);
                self.link.send_response(&response)
            }
        }
    }
}
