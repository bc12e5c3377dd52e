//! CTAP1 / U2F raw messages
//!
//! Carried in HID `MSG` frames and as ISO 7816 APDUs over NFC. Key handles
//! are ordinary credential ids bound to the application parameter, so a
//! U2F registration can later be used through CTAP2 and the other way round.

use alloc::vec::Vec;

use openfido_crypto::ecdsa;

use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{HostChannel, NoHost, RecordStore, UpResult, UserPresence};
use crate::commands::flags;
use crate::credential::CREDENTIAL_ID_SIZE;
use crate::status::StatusCode;

/// ISO 7816 status words
pub mod sw {
    pub const NO_ERROR: u16 = 0x9000;
    pub const WRONG_LENGTH: u16 = 0x6700;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const WRONG_DATA: u16 = 0x6A80;
    pub const WRONG_P1P2: u16 = 0x6A86;
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;
    pub const UNKNOWN: u16 = 0x6F00;
}

pub const INS_REGISTER: u8 = 0x01;
pub const INS_AUTHENTICATE: u8 = 0x02;
pub const INS_VERSION: u8 = 0x03;

const AUTH_CHECK_ONLY: u8 = 0x07;
const AUTH_ENFORCE: u8 = 0x03;
const AUTH_DONT_ENFORCE: u8 = 0x08;

const REGISTER_RESERVED: u8 = 0x05;
const REGISTER_REQUEST_LEN: usize = 64;

/// Presence window for U2F; clients retry on 6985
pub const U2F_PRESENCE_TIMEOUT_MS: u64 = 750;

pub const VERSION: &[u8] = b"U2F_V2";

/// A parsed command APDU: header plus data field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Request<'a> {
    cla: u8,
    ins: u8,
    p1: u8,
    data: &'a [u8],
}

impl<'a> Request<'a> {
    /// Accepts short and extended Lc encodings, with or without Le
    fn parse(apdu: &'a [u8]) -> Result<Self, u16> {
        let [cla, ins, p1, _p2, rest @ ..] = apdu else {
            return Err(sw::WRONG_LENGTH);
        };
        let data = match rest {
            [] => &[][..],
            // Le only
            [_] => &[][..],
            [0, hi, lo, body @ ..] => {
                let lc = usize::from(u16::from_be_bytes([*hi, *lo]));
                match body.len().checked_sub(lc) {
                    Some(0..=2) => &body[..lc],
                    _ => return Err(sw::WRONG_LENGTH),
                }
            }
            [lc, body @ ..] => {
                let lc = usize::from(*lc);
                match body.len().checked_sub(lc) {
                    Some(0 | 1) => &body[..lc],
                    _ => return Err(sw::WRONG_LENGTH),
                }
            }
        };
        Ok(Self {
            cla: *cla,
            ins: *ins,
            p1: *p1,
            data,
        })
    }
}

/// Handle one U2F request; the response always ends with a status word
pub fn u2f_request<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    apdu: &[u8],
) -> Vec<u8> {
    u2f_request_on(ctx, apdu, &mut NoHost)
}

/// [`u2f_request`] with keepalives and CANCEL carried over `host`
pub fn u2f_request_on<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    apdu: &[u8],
    host: &mut dyn HostChannel,
) -> Vec<u8> {
    ctx.clear_cancel();
    let result = Request::parse(apdu).and_then(|request| {
        if request.cla != 0 {
            return Err(sw::CLA_NOT_SUPPORTED);
        }
        match request.ins {
            INS_REGISTER => register(ctx, request.data, host),
            INS_AUTHENTICATE => authenticate(ctx, request.p1, request.data, host),
            INS_VERSION if request.data.is_empty() => Ok(VERSION.to_vec()),
            INS_VERSION => Err(sw::WRONG_LENGTH),
            _ => Err(sw::INS_NOT_SUPPORTED),
        }
    });

    match result {
        Ok(mut response) => {
            response.extend_from_slice(&sw::NO_ERROR.to_be_bytes());
            response
        }
        Err(status) => {
            log::debug!("U2F request failed: {status:04x}");
            status.to_be_bytes().to_vec()
        }
    }
}

fn internal(status: StatusCode) -> u16 {
    log::error!("U2F internal failure: {status}");
    sw::UNKNOWN
}

fn present<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    host: &mut dyn HostChannel,
) -> bool {
    matches!(
        ctx.user_presence_test_within(U2F_PRESENCE_TIMEOUT_MS, host),
        UpResult::Accepted
    )
}

fn register<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    data: &[u8],
    host: &mut dyn HostChannel,
) -> Result<Vec<u8>, u16> {
    if data.len() != REGISTER_REQUEST_LEN {
        return Err(sw::WRONG_LENGTH);
    }
    let (challenge, app_param) = data.split_at(32);
    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(app_param);

    if !present(ctx, host) {
        return Err(sw::CONDITIONS_NOT_SATISFIED);
    }

    let count = ctx.advance_counter().map_err(internal)?;
    let credential = ctx.make_credential_id(&rp_id_hash, count).map_err(internal)?;
    let key_handle = credential.to_bytes();
    let private_key = ctx.credential_private_key(&credential).map_err(internal)?;
    let public_key = ecdsa::public_from_private(&private_key).map_err(|err| internal(err.into()))?;

    let signed = [&[0x00][..], app_param, challenge, &key_handle[..], &public_key[..]].concat();
    let signature = ecdsa::sign(ctx.attestation_key(), &signed).map_err(|err| internal(err.into()))?;

    let cert = ctx.config().attestation_cert.as_deref().unwrap_or_default();
    let mut response = Vec::with_capacity(1 + 65 + 1 + CREDENTIAL_ID_SIZE + cert.len() + signature.len());
    response.push(REGISTER_RESERVED);
    response.extend_from_slice(&public_key);
    response.push(CREDENTIAL_ID_SIZE as u8);
    response.extend_from_slice(&key_handle);
    response.extend_from_slice(cert);
    response.extend_from_slice(&signature);
    log::info!("U2F registration (count {count})");
    Ok(response)
}

fn authenticate<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    control: u8,
    data: &[u8],
    host: &mut dyn HostChannel,
) -> Result<Vec<u8>, u16> {
    if data.len() < 65 || data.len() != 65 + usize::from(data[64]) {
        return Err(sw::WRONG_LENGTH);
    }
    let challenge = &data[..32];
    let app_param = &data[32..64];
    let key_handle = &data[65..];
    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(app_param);

    let credential = ctx
        .authenticate_credential(key_handle, &rp_id_hash)
        .ok_or(sw::WRONG_DATA)?;

    let auth_flags = match control {
        AUTH_CHECK_ONLY => return Err(sw::CONDITIONS_NOT_SATISFIED),
        AUTH_ENFORCE => {
            if !present(ctx, host) {
                return Err(sw::CONDITIONS_NOT_SATISFIED);
            }
            flags::UP
        }
        AUTH_DONT_ENFORCE => 0,
        _ => return Err(sw::WRONG_P1P2),
    };

    let count = ctx.advance_counter().map_err(internal)?;
    let counter = count.to_be_bytes();
    let private_key = ctx.credential_private_key(&credential).map_err(internal)?;
    let signed = [app_param, &[auth_flags][..], &counter[..], challenge].concat();
    let signature = ecdsa::sign(&private_key, &signed).map_err(|err| internal(err.into()))?;

    let mut response = Vec::with_capacity(5 + signature.len());
    response.push(auth_flags);
    response.extend_from_slice(&counter);
    response.extend_from_slice(&signature);
    Ok(response)
}
