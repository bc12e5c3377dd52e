//! authenticatorGetAssertion command
//!
//! Signs the client data hash with a credential scoped to the relying party.
//! Candidates come from the allow list, or from the resident keys when no
//! allow list is sent. The highest-count candidate answers first; the rest
//! are queued for getNextAssertion.

use alloc::vec::Vec;

use openfido_crypto::ecdsa;
use sha2::{Digest, Sha256};

use super::{empty_pin_auth_touch, flags};
use crate::authenticator::{
    AUTH_DATA_HEADER_LEN, AssertionCandidate, AssertionState, AuthenticatorContext,
};
use crate::callbacks::{HostChannel, RecordStore, UpResult, UserPresence};
use crate::cbor::{MapBuilder, MapParser, Value};
use crate::extensions::HmacSecretInput;
use crate::status::{Result, StatusCode};
use crate::types::{DOMAIN_NAME_MAX_SIZE, PublicKeyCredentialDescriptor, RequestOptions};

/// GetAssertion request parameter keys
pub mod req_keys {
    pub const RP_ID: i64 = 0x01;
    pub const CLIENT_DATA_HASH: i64 = 0x02;
    pub const ALLOW_LIST: i64 = 0x03;
    pub const EXTENSIONS: i64 = 0x04;
    pub const OPTIONS: i64 = 0x05;
    pub const PIN_AUTH: i64 = 0x06;
    pub const PIN_PROTOCOL: i64 = 0x07;
}

/// GetAssertion and getNextAssertion response keys
pub mod resp_keys {
    pub const CREDENTIAL: i64 = 0x01;
    pub const AUTH_DATA: i64 = 0x02;
    pub const SIGNATURE: i64 = 0x03;
    pub const USER: i64 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: i64 = 0x05;
}

#[derive(Debug)]
struct Request {
    rp_id: Option<alloc::string::String>,
    client_data_hash: Option<[u8; 32]>,
    allow_list: Option<Vec<PublicKeyCredentialDescriptor>>,
    hmac_secret: Option<HmacSecretInput>,
    options: RequestOptions,
    pin_auth: Option<Vec<u8>>,
}

impl Request {
    fn parse(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let rp_id = match parser.get_raw(req_keys::RP_ID) {
            Some(Value::Text(id)) if id.is_empty() || id.len() > DOMAIN_NAME_MAX_SIZE => {
                return Err(StatusCode::InvalidLength);
            }
            Some(Value::Text(id)) => Some(id.clone()),
            Some(_) => return Err(StatusCode::CborUnexpectedType),
            None => None,
        };
        let client_data_hash = parser
            .get_bytes_opt(req_keys::CLIENT_DATA_HASH)?
            .map(|hash| <[u8; 32]>::try_from(hash.as_slice()))
            .transpose()
            .map_err(|_| StatusCode::InvalidLength)?;
        let allow_list = parser
            .get_raw(req_keys::ALLOW_LIST)
            .map(PublicKeyCredentialDescriptor::list_from_value)
            .transpose()?;
        let hmac_secret = match parser.get_raw(req_keys::EXTENSIONS) {
            Some(extensions) => HmacSecretInput::from_extensions(extensions)?,
            None => None,
        };
        let options = parser
            .get_raw(req_keys::OPTIONS)
            .map(RequestOptions::from_value)
            .transpose()?
            .unwrap_or_default();
        let pin_auth = parser.get_bytes_opt(req_keys::PIN_AUTH)?;
        parser.get_int_opt(req_keys::PIN_PROTOCOL)?;

        Ok(Self {
            rp_id,
            client_data_hash,
            allow_list,
            hmac_secret,
            options,
            pin_auth,
        })
    }
}

pub fn handle<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    data: &[u8],
    host: &mut dyn HostChannel,
) -> Result<Vec<u8>> {
    let request = Request::parse(data)?;

    if request.pin_auth.as_deref().is_some_and(<[u8]>::is_empty) {
        empty_pin_auth_touch(ctx, host)?;
    }

    let (Some(rp_id), Some(client_data_hash)) = (&request.rp_id, request.client_data_hash) else {
        return Err(StatusCode::MissingParameter);
    };

    let user_verified = match &request.pin_auth {
        Some(pin_auth) => {
            if !ctx.verify_pin_auth(pin_auth, &client_data_hash) {
                log::warn!("getAssertion pinAuth mismatch");
                return Err(StatusCode::PinAuthInvalid);
            }
            true
        }
        None => false,
    };

    if request.options.rk.is_some() {
        return Err(StatusCode::InvalidOption);
    }
    if request.options.uv == Some(true) {
        return Err(StatusCode::UnsupportedOption);
    }

    let rp_id_hash: [u8; 32] = Sha256::digest(rp_id.as_bytes()).into();
    let allow_list = request.allow_list.as_deref().filter(|list| !list.is_empty());
    let mut candidates = collect_candidates(ctx, &rp_id_hash, allow_list);
    if candidates.is_empty() {
        log::info!("no credentials for {rp_id}");
        return Err(StatusCode::NoCredentials);
    }
    candidates.sort_by_key(|candidate| candidate.id.count);
    let total = candidates.len();
    let Some(first) = candidates.pop() else {
        return Err(StatusCode::NoCredentials);
    };

    let count = ctx.advance_counter()?;

    ctx.set_up_disabled(request.options.up == Some(false));
    let presence = ctx.user_presence_test(host);
    ctx.set_up_disabled(false);
    let user_present = match presence {
        UpResult::Accepted => true,
        UpResult::Disabled => false,
        other => {
            other.into_status()?;
            false
        }
    };

    let mut auth_flags = 0;
    if user_present {
        auth_flags |= flags::UP;
    }
    if user_verified {
        auth_flags |= flags::UV;
    }

    let mut auth_data = Vec::with_capacity(AUTH_DATA_HEADER_LEN + 96);
    auth_data.extend_from_slice(&rp_id_hash);
    auth_data.push(auth_flags);
    auth_data.extend_from_slice(&count.to_be_bytes());

    let mut auth_data_header = [0u8; AUTH_DATA_HEADER_LEN];
    auth_data_header.copy_from_slice(&auth_data);

    if let Some(input) = &request.hmac_secret {
        let output = input.process(ctx, &first.id)?;
        auth_data.extend_from_slice(&output.encode()?);
        auth_data[32] |= flags::ED;
    }

    ctx.assertion = AssertionState {
        client_data_hash,
        auth_data_header,
        user_verified,
        remaining: candidates,
    };

    log::info!("assertion for {rp_id} with {total} credential(s)");

    let disclose = total > 1 && user_verified;
    let number_of_credentials = (total > 1).then_some(total);
    assertion_response(
        ctx,
        &first,
        &auth_data,
        &client_data_hash,
        disclose,
        number_of_credentials,
    )
}

/// Authentic credentials for `rp_id_hash`
///
/// Allow-list entries pick up user details from a matching resident key.
fn collect_candidates<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    rp_id_hash: &[u8; 32],
    allow_list: Option<&[PublicKeyCredentialDescriptor]>,
) -> Vec<AssertionCandidate> {
    let resident = ctx.resident_keys();

    match allow_list {
        Some(allow_list) => allow_list
            .iter()
            .filter(|descriptor| descriptor.is_public_key())
            .filter_map(|descriptor| ctx.authenticate_credential(&descriptor.id, rp_id_hash))
            .map(|id| {
                let user = resident
                    .iter()
                    .find(|rk| rk.id == id)
                    .map(|rk| rk.user.clone())
                    .unwrap_or_default();
                AssertionCandidate { id, user }
            })
            .collect(),
        None => resident
            .into_iter()
            .filter(|rk| rk.id.rp_id_hash == *rp_id_hash)
            .filter(|rk| ctx.authenticate_credential(&rk.id.to_bytes(), rp_id_hash).is_some())
            .map(|rk| AssertionCandidate {
                id: rk.id,
                user: rk.user,
            })
            .collect(),
    }
}

/// Encode one assertion, signing `auth_data || client_data_hash` with the
/// credential key.
pub(crate) fn assertion_response<S: RecordStore, P: UserPresence>(
    ctx: &AuthenticatorContext<S, P>,
    candidate: &AssertionCandidate,
    auth_data: &[u8],
    client_data_hash: &[u8; 32],
    disclose: bool,
    number_of_credentials: Option<usize>,
) -> Result<Vec<u8>> {
    let private_key = ctx.credential_private_key(&candidate.id)?;
    let signature = ecdsa::sign(&private_key, &[auth_data, &client_data_hash[..]].concat())?;
    let descriptor = PublicKeyCredentialDescriptor::new(candidate.id.to_bytes().to_vec());

    let mut builder = MapBuilder::new()
        .insert_value(resp_keys::CREDENTIAL, descriptor.to_value())
        .insert_bytes(resp_keys::AUTH_DATA, auth_data)
        .insert_bytes(resp_keys::SIGNATURE, &signature);
    if !candidate.user.id.is_empty() {
        builder = builder.insert_value(resp_keys::USER, candidate.user.to_value(disclose));
    }
    builder
        .insert_opt(
            resp_keys::NUMBER_OF_CREDENTIALS,
            number_of_credentials.map(|n| n as u64),
        )?
        .build()
}
