//! authenticatorClientPIN command, PIN protocol one
//!
//! Subcommands: getRetries, getKeyAgreement, setPIN, changePIN and
//! getPINToken. Shared secrets are `SHA-256(ECDH(platform, authenticator).x)`;
//! PIN material travels AES-256-CBC encrypted with a zero IV and is
//! authenticated with HMAC-SHA-256 truncated to 16 bytes.

use alloc::vec::Vec;

use openfido_crypto::pin_protocol;
use zeroize::Zeroizing;

use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{RecordStore, UserPresence};
use crate::cbor::{MapBuilder, MapParser, Value};
use crate::status::{Result, StatusCode};

/// Request parameter keys
pub mod req_keys {
    pub const PIN_PROTOCOL: i64 = 0x01;
    pub const SUB_COMMAND: i64 = 0x02;
    pub const KEY_AGREEMENT: i64 = 0x03;
    pub const PIN_AUTH: i64 = 0x04;
    pub const NEW_PIN_ENC: i64 = 0x05;
    pub const PIN_HASH_ENC: i64 = 0x06;
}

/// Response keys
pub mod resp_keys {
    pub const KEY_AGREEMENT: i64 = 0x01;
    pub const PIN_TOKEN: i64 = 0x02;
    pub const RETRIES: i64 = 0x03;
}

/// ClientPIN subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubCommand {
    GetRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
}

impl SubCommand {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0x01 => Some(Self::GetRetries),
            0x02 => Some(Self::GetKeyAgreement),
            0x03 => Some(Self::SetPin),
            0x04 => Some(Self::ChangePin),
            0x05 => Some(Self::GetPinToken),
            _ => None,
        }
    }

    /// Subcommands refused outright on a locked device
    fn needs_unlocked(self) -> bool {
        matches!(self, Self::SetPin | Self::ChangePin | Self::GetPinToken)
    }
}

/// Encrypted new PIN is at least this long (one padded 64-byte block)
pub const NEW_PIN_ENC_MIN_SIZE: usize = 64;
pub const NEW_PIN_MIN_SIZE: usize = 4;
pub const NEW_PIN_MAX_SIZE: usize = 64;

const PIN_HASH_ENC_SIZE: usize = 16;

struct ClientPinRequest {
    pin_protocol: i64,
    sub_command: i64,
    key_agreement: Option<Value>,
    pin_auth: Option<Vec<u8>>,
    new_pin_enc: Option<Vec<u8>>,
    pin_hash_enc: Option<Vec<u8>>,
}

impl ClientPinRequest {
    fn parse(parser: &MapParser) -> Result<Self> {
        let pin_protocol = parser
            .get_int_opt(req_keys::PIN_PROTOCOL)?
            .ok_or(StatusCode::MissingParameter)?;
        let sub_command = parser
            .get_int_opt(req_keys::SUB_COMMAND)?
            .ok_or(StatusCode::MissingParameter)?;
        let key_agreement = parser.get_raw(req_keys::KEY_AGREEMENT).cloned();
        if let Some(key) = &key_agreement {
            if !matches!(key, Value::Map(_)) {
                return Err(StatusCode::CborUnexpectedType);
            }
        }
        let pin_hash_enc = parser.get_bytes_opt(req_keys::PIN_HASH_ENC)?;
        if pin_hash_enc
            .as_ref()
            .is_some_and(|h| h.len() != PIN_HASH_ENC_SIZE)
        {
            return Err(StatusCode::InvalidLength);
        }
        Ok(Self {
            pin_protocol,
            sub_command,
            key_agreement,
            pin_auth: parser.get_bytes_opt(req_keys::PIN_AUTH)?,
            new_pin_enc: parser
                .get_bytes_opt(req_keys::NEW_PIN_ENC)?
                .filter(|p| !p.is_empty()),
            pin_hash_enc,
        })
    }
}

pub fn handle<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let parsed = MapParser::from_bytes(data);

    // Lock state wins over malformed input for the PIN-changing subcommands
    let sub_command = parsed
        .as_ref()
        .ok()
        .and_then(|p| p.get_int_opt(req_keys::SUB_COMMAND).ok().flatten())
        .and_then(SubCommand::from_i64);
    if sub_command.is_some_and(SubCommand::needs_unlocked) {
        if ctx.is_locked() {
            return Err(StatusCode::PinBlocked);
        }
        if ctx.is_boot_locked() {
            return Err(StatusCode::PinAuthBlocked);
        }
    }

    let request = ClientPinRequest::parse(&parsed?)?;
    if request.pin_protocol != 1 || request.sub_command == 0 {
        return Err(StatusCode::Other);
    }

    let Some(sub_command) = SubCommand::from_i64(request.sub_command) else {
        log::warn!("invalid clientPIN subcommand {}", request.sub_command);
        return Err(StatusCode::Other);
    };
    log::debug!("clientPIN {sub_command:?}");

    match sub_command {
        SubCommand::GetRetries => MapBuilder::new()
            .insert(resp_keys::RETRIES, i64::from(ctx.pin_retries()))?
            .build(),
        SubCommand::GetKeyAgreement => MapBuilder::new()
            .insert_value(resp_keys::KEY_AGREEMENT, ctx.key_agreement_cose())
            .build(),
        SubCommand::SetPin => {
            if ctx.is_pin_set() {
                return Err(StatusCode::NotAllowed);
            }
            let (Some(new_pin_enc), Some(pin_auth), Some(key_agreement)) =
                (&request.new_pin_enc, &request.pin_auth, &request.key_agreement)
            else {
                return Err(StatusCode::MissingParameter);
            };
            update_pin_if_verified(ctx, new_pin_enc, key_agreement, pin_auth, None)?;
            Ok(Vec::new())
        }
        SubCommand::ChangePin => {
            if !ctx.is_pin_set() {
                return Err(StatusCode::PinNotSet);
            }
            let (Some(new_pin_enc), Some(pin_auth), Some(key_agreement), Some(pin_hash_enc)) = (
                &request.new_pin_enc,
                &request.pin_auth,
                &request.key_agreement,
                &request.pin_hash_enc,
            ) else {
                return Err(StatusCode::MissingParameter);
            };
            update_pin_if_verified(ctx, new_pin_enc, key_agreement, pin_auth, Some(pin_hash_enc))?;
            Ok(Vec::new())
        }
        SubCommand::GetPinToken => {
            if !ctx.is_pin_set() {
                return Err(StatusCode::PinNotSet);
            }
            let (Some(key_agreement), Some(pin_hash_enc)) =
                (&request.key_agreement, &request.pin_hash_enc)
            else {
                log::warn!("getPinToken without keyAgreement or pinHashEnc");
                return Err(StatusCode::MissingParameter);
            };
            let pin_token_enc = pin_token_if_verified(ctx, key_agreement, pin_hash_enc)?;
            MapBuilder::new()
                .insert_bytes(resp_keys::PIN_TOKEN, &pin_token_enc)
                .build()
        }
    }
}

/// Length of a zero-padded PIN: 64 minus the trailing zero bytes
fn padded_pin_len(padded: &[u8]) -> usize {
    let window = &padded[..NEW_PIN_ENC_MIN_SIZE];
    let zeros = window.iter().rev().take_while(|b| **b == 0).count();
    NEW_PIN_ENC_MIN_SIZE - zeros
}

/// Check a decrypted `pinHashEnc` against the stored hash, burning an
/// attempt and rotating the key-agreement pair on mismatch.
fn check_pin_hash<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    shared: &[u8; 32],
    pin_hash_enc: &[u8],
) -> Result<()> {
    let pin_hash = Zeroizing::new(pin_protocol::decrypt(shared, pin_hash_enc)?);
    if ctx.pin_hash_matches(&pin_hash) {
        return ctx.reset_pin_attempts();
    }
    log::warn!("PIN mismatch");
    ctx.reset_key_agreement();
    // A device already locked here is reported by the boot-lock check below
    // or by the next request. Store failures are not.
    match ctx.decrement_pin_attempts() {
        Ok(()) | Err(StatusCode::PinBlocked) => {}
        Err(err) => return Err(err),
    }
    if ctx.is_boot_locked() {
        return Err(StatusCode::PinAuthBlocked);
    }
    Err(StatusCode::PinInvalid)
}

fn update_pin_if_verified<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    new_pin_enc: &[u8],
    key_agreement: &Value,
    pin_auth: &[u8],
    pin_hash_enc: Option<&Vec<u8>>,
) -> Result<()> {
    if new_pin_enc.len() < NEW_PIN_ENC_MIN_SIZE {
        return Err(StatusCode::Other);
    }
    if ctx.is_pin_set() {
        if ctx.is_locked() {
            return Err(StatusCode::PinBlocked);
        }
        if ctx.is_boot_locked() {
            return Err(StatusCode::PinAuthBlocked);
        }
    }

    let shared = Zeroizing::new(ctx.shared_secret(key_agreement)?);

    let mut parts: Vec<&[u8]> = Vec::with_capacity(2);
    parts.push(new_pin_enc);
    if let Some(pin_hash_enc) = pin_hash_enc {
        parts.push(pin_hash_enc);
    }
    if pin_auth.len() != pin_protocol::AUTH_TAG_SIZE
        || !pin_protocol::verify(&shared[..], &parts, pin_auth)?
    {
        log::warn!("pinAuth failed for PIN update");
        return Err(StatusCode::PinAuthInvalid);
    }

    // Round up to the block size; ciphertext that is not block aligned
    // decrypts as if zero padded.
    let mut aligned = Zeroizing::new(new_pin_enc.to_vec());
    let padded_len = aligned.len().div_ceil(pin_protocol::BLOCK_SIZE) * pin_protocol::BLOCK_SIZE;
    aligned.resize(padded_len, 0);
    let new_pin = Zeroizing::new(pin_protocol::decrypt(&shared, &aligned)?);

    let pin_len = padded_pin_len(&new_pin);
    if !(NEW_PIN_MIN_SIZE..NEW_PIN_MAX_SIZE).contains(&pin_len) {
        log::warn!("new PIN is {pin_len} bytes");
        return Err(StatusCode::PinPolicyViolation);
    }

    if ctx.is_pin_set() {
        let pin_hash_enc = pin_hash_enc.ok_or(StatusCode::MissingParameter)?;
        check_pin_hash(ctx, &shared, pin_hash_enc)?;
    }

    ctx.update_pin(&new_pin[..pin_len])
}

fn pin_token_if_verified<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    key_agreement: &Value,
    pin_hash_enc: &[u8],
) -> Result<Vec<u8>> {
    let shared = Zeroizing::new(ctx.shared_secret(key_agreement)?);
    check_pin_hash(ctx, &shared, pin_hash_enc)?;
    Ok(pin_protocol::encrypt(&shared, ctx.pin_token.as_bytes())?)
}
