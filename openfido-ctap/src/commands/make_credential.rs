//! authenticatorMakeCredential command
//!
//! Mints a credential bound to the relying party, optionally storing it as a
//! resident key, and returns a packed self-attestation signed with the
//! device attestation key.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use openfido_crypto::ecdsa;
use sha2::{Digest, Sha256};

use super::{empty_pin_auth_touch, flags};
use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{HostChannel, RecordStore, UpResult, UserPresence};
use crate::cbor::{self, MapBuilder, MapParser, TextMapBuilder, Value};
use crate::credential::CREDENTIAL_ID_SIZE;
use crate::extensions::{self, HmacSecretOutput};
use crate::state::ResidentKey;
use crate::status::{Result, StatusCode};
use crate::types::{
    CoseAlgorithm, PUBLIC_KEY_TYPE, PublicKeyCredentialDescriptor, RelyingParty, RequestOptions,
    User,
};

/// MakeCredential request parameter keys
pub mod req_keys {
    pub const CLIENT_DATA_HASH: i64 = 0x01;
    pub const RP: i64 = 0x02;
    pub const USER: i64 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: i64 = 0x04;
    pub const EXCLUDE_LIST: i64 = 0x05;
    pub const EXTENSIONS: i64 = 0x06;
    pub const OPTIONS: i64 = 0x07;
    pub const PIN_AUTH: i64 = 0x08;
    pub const PIN_PROTOCOL: i64 = 0x09;
}

/// MakeCredential response keys
pub mod resp_keys {
    pub const FMT: i64 = 0x01;
    pub const AUTH_DATA: i64 = 0x02;
    pub const ATT_STMT: i64 = 0x03;
}

const ATTESTATION_FORMAT: &str = "packed";

/// Offset of the credential id inside attested authenticator data
pub(crate) const CREDENTIAL_ID_OFFSET: usize = 32 + 1 + 4 + 16 + 2;

#[derive(Debug)]
struct Request {
    client_data_hash: Option<[u8; 32]>,
    rp: Option<RelyingParty>,
    user: Option<User>,
    has_cred_params: bool,
    exclude_list: Vec<PublicKeyCredentialDescriptor>,
    hmac_secret: bool,
    options: RequestOptions,
    pin_auth: Option<Vec<u8>>,
}

impl Request {
    fn parse(data: &[u8]) -> Result<Self> {
        let parser = MapParser::from_bytes(data)?;

        let client_data_hash = parser
            .get_bytes_opt(req_keys::CLIENT_DATA_HASH)?
            .map(|hash| <[u8; 32]>::try_from(hash.as_slice()))
            .transpose()
            .map_err(|_| StatusCode::InvalidLength)?;
        let rp = parser
            .get_raw(req_keys::RP)
            .map(RelyingParty::from_value)
            .transpose()?;
        let user = parser
            .get_raw(req_keys::USER)
            .map(User::from_value)
            .transpose()?;

        let offers_es256 = parser
            .get_raw(req_keys::PUB_KEY_CRED_PARAMS)
            .map(offers_es256)
            .transpose()?;
        if offers_es256 == Some(false) {
            log::warn!("no supported algorithm offered");
            return Err(StatusCode::UnsupportedAlgorithm);
        }

        let exclude_list = parser
            .get_raw(req_keys::EXCLUDE_LIST)
            .map(exclude_descriptors)
            .transpose()?
            .unwrap_or_default();
        let hmac_secret = parser
            .get_raw(req_keys::EXTENSIONS)
            .map(extensions::make_credential_requested)
            .transpose()?
            .unwrap_or(false);
        let options = parser
            .get_raw(req_keys::OPTIONS)
            .map(RequestOptions::from_value)
            .transpose()?
            .unwrap_or_default();
        let pin_auth = parser.get_bytes_opt(req_keys::PIN_AUTH)?;
        parser.get_int_opt(req_keys::PIN_PROTOCOL)?;

        Ok(Self {
            client_data_hash,
            rp,
            user,
            has_cred_params: offers_es256.is_some(),
            exclude_list,
            hmac_secret,
            options,
            pin_auth,
        })
    }
}

/// Scan `pubKeyCredParams` for ES256
fn offers_es256(value: &Value) -> Result<bool> {
    let Value::Array(items) = value else {
        return Err(StatusCode::CborUnexpectedType);
    };
    let mut found = false;
    for item in items {
        let cred_type = match cbor::text_map_get(item, "type") {
            Some(Value::Text(t)) => t,
            Some(_) => return Err(StatusCode::CborUnexpectedType),
            None => return Err(StatusCode::MissingParameter),
        };
        let alg = match cbor::text_map_get(item, "alg") {
            Some(Value::Integer(alg)) => *alg,
            Some(_) => return Err(StatusCode::CborUnexpectedType),
            None => return Err(StatusCode::MissingParameter),
        };
        if cred_type == PUBLIC_KEY_TYPE && alg == i128::from(CoseAlgorithm::ES256 as i64) {
            found = true;
        }
    }
    Ok(found)
}

/// Exclude list entries that fail to parse are skipped
fn exclude_descriptors(value: &Value) -> Result<Vec<PublicKeyCredentialDescriptor>> {
    let Value::Array(items) = value else {
        return Err(StatusCode::CborUnexpectedType);
    };
    Ok(items
        .iter()
        .filter_map(|item| cbor::from_value(item).ok())
        .collect())
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

    let (Some(client_data_hash), Some(rp), Some(user), true) = (
        request.client_data_hash,
        request.rp,
        request.user,
        request.has_cred_params,
    ) else {
        return Err(StatusCode::MissingParameter);
    };

    match &request.pin_auth {
        Some(pin_auth) => {
            if !ctx.verify_pin_auth(pin_auth, &client_data_hash) {
                log::warn!("makeCredential pinAuth mismatch");
                return Err(StatusCode::PinAuthInvalid);
            }
        }
        None if ctx.is_pin_set() => return Err(StatusCode::PinRequired),
        None => {}
    }

    if request.options.up.is_some() {
        return Err(StatusCode::InvalidOption);
    }
    if request.options.uv == Some(true) {
        return Err(StatusCode::UnsupportedOption);
    }

    let rp_id_hash: [u8; 32] = Sha256::digest(rp.id.as_bytes()).into();

    for descriptor in &request.exclude_list {
        if descriptor.is_public_key()
            && ctx
                .authenticate_credential(&descriptor.id, &rp_id_hash)
                .is_some()
        {
            log::info!("excluded credential present for {}", rp.id);
            return Err(StatusCode::CredentialExcluded);
        }
    }

    let count = ctx.advance_counter()?;

    let user_present = match ctx.user_presence_test(host) {
        UpResult::Accepted => true,
        UpResult::Disabled => false,
        other => {
            other.into_status()?;
            false
        }
    };

    let mut auth_flags = flags::AT;
    if user_present {
        auth_flags |= flags::UP;
    }
    if ctx.is_pin_set() {
        auth_flags |= flags::UV;
    }

    let credential = ctx.make_credential_id(&rp_id_hash, count)?;

    if request.options.rk == Some(true) {
        ctx.save_resident_key(&ResidentKey {
            id: credential,
            user,
        })?;
    }

    let private_key = ctx.credential_private_key(&credential)?;
    let (x, y) = ecdsa::public_cose_from_private(&private_key)?;
    let cose_key = cbor::encode(&cbor::cose_ec2_key(CoseAlgorithm::ES256 as i64, &x, &y))?;

    let mut auth_data = Vec::with_capacity(CREDENTIAL_ID_OFFSET + CREDENTIAL_ID_SIZE + cose_key.len() + 16);
    auth_data.extend_from_slice(&rp_id_hash);
    auth_data.push(auth_flags);
    auth_data.extend_from_slice(&count.to_be_bytes());
    auth_data.extend_from_slice(&ctx.config().aaguid);
    auth_data.extend_from_slice(&(CREDENTIAL_ID_SIZE as u16).to_be_bytes());
    auth_data.extend_from_slice(&credential.to_bytes());
    auth_data.extend_from_slice(&cose_key);

    if request.hmac_secret {
        auth_data.extend_from_slice(&HmacSecretOutput::Enabled.encode()?);
        auth_data[32] |= flags::ED;
    }

    let signature = ecdsa::sign(ctx.attestation_key(), &[&auth_data[..], &client_data_hash[..]].concat())?;

    let mut att_stmt = TextMapBuilder::new()
        .insert_value("alg", Value::Integer(i128::from(CoseAlgorithm::ES256 as i64)))
        .insert_bytes("sig", &signature);
    if let Some(cert) = &ctx.config().attestation_cert {
        att_stmt = att_stmt.insert_value("x5c", Value::Array(vec![Value::Bytes(cert.clone())]));
    }

    log::info!("registered credential for {} (count {count})", rp.id);

    MapBuilder::new()
        .insert_value(resp_keys::FMT, Value::Text(String::from(ATTESTATION_FORMAT)))
        .insert_bytes(resp_keys::AUTH_DATA, &auth_data)
        .insert_value(resp_keys::ATT_STMT, att_stmt.build_value())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NoHost;
    use crate::authenticator::AuthenticatorConfig;
    use crate::credential::CredentialId;
    use crate::store::MemoryStore;
    use crate::testing::{
        context, context_with, get_pin_token, make_credential_request, pin_auth, register, set_pin,
    };

    const CDH: [u8; 32] = [0x11; 32];

    fn auth_data(response: &[u8]) -> Vec<u8> {
        MapParser::from_bytes(response)
            .unwrap()
            .get_bytes(resp_keys::AUTH_DATA)
            .unwrap()
    }

    #[test]
    fn test_registration_response() {
        let mut ctx = context();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .build()
            .unwrap();
        let response = handle(&mut ctx, &request, &mut NoHost).unwrap();
        let parsed = MapParser::from_bytes(&response).unwrap();

        let fmt: String = parsed.get(resp_keys::FMT).unwrap();
        assert_eq!(fmt, "packed");

        let auth_data = parsed.get_bytes(resp_keys::AUTH_DATA).unwrap();
        let rp_id_hash: [u8; 32] = Sha256::digest(b"example.com").into();
        assert_eq!(&auth_data[..32], &rp_id_hash);
        assert_eq!(auth_data[32], flags::UP | flags::AT);
        assert_eq!(&auth_data[37..53], &ctx.config().aaguid);
        assert_eq!(&auth_data[53..55], &[0, 68]);

        let id = &auth_data[CREDENTIAL_ID_OFFSET..CREDENTIAL_ID_OFFSET + CREDENTIAL_ID_SIZE];
        let credential = ctx.authenticate_credential(id, &rp_id_hash).unwrap();
        assert_eq!(
            credential.count,
            u32::from_be_bytes(auth_data[33..37].try_into().unwrap())
        );

        let att_stmt = parsed.get_raw(resp_keys::ATT_STMT).unwrap();
        assert_eq!(
            cbor::text_map_get(att_stmt, "alg"),
            Some(&Value::Integer(-7))
        );
        assert!(cbor::text_map_get(att_stmt, "x5c").is_none());
        let Some(Value::Bytes(sig)) = cbor::text_map_get(att_stmt, "sig") else {
            panic!("missing signature");
        };
        let public = ecdsa::public_from_private(ctx.attestation_key()).unwrap();
        ecdsa::verify(&public, &[&auth_data[..], &CDH[..]].concat(), sig).unwrap();
    }

    #[test]
    fn test_attestation_certificate_is_included() {
        let config = AuthenticatorConfig::new().with_attestation_cert(vec![0x30, 0x03, 0x02, 0x01, 0x01]);
        let mut ctx = context_with(config, MemoryStore::new());
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .build()
            .unwrap();
        let response = handle(&mut ctx, &request, &mut NoHost).unwrap();
        let parsed = MapParser::from_bytes(&response).unwrap();
        let att_stmt = parsed.get_raw(resp_keys::ATT_STMT).unwrap();
        assert_eq!(
            cbor::text_map_get(att_stmt, "x5c"),
            Some(&Value::Array(vec![Value::Bytes(vec![0x30, 0x03, 0x02, 0x01, 0x01])]))
        );
    }

    #[test]
    fn test_counter_increases() {
        let mut ctx = context();
        let first = CredentialId::from_bytes(&register(&mut ctx, "example.com", b"a", false)).unwrap();
        let second = CredentialId::from_bytes(&register(&mut ctx, "example.com", b"a", false)).unwrap();
        assert!(second.count > first.count);
        assert_ne!(first.nonce, second.nonce);
    }

    #[test]
    fn test_missing_parameters() {
        let mut ctx = context();
        let request = MapBuilder::new()
            .insert_bytes(req_keys::CLIENT_DATA_HASH, &CDH)
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::MissingParameter));
    }

    #[test]
    fn test_client_data_hash_length() {
        let mut ctx = context();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_bytes(req_keys::CLIENT_DATA_HASH, &[0u8; 31])
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::InvalidLength));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let mut ctx = context();
        let rs256 = TextMapBuilder::new()
            .insert_value("alg", Value::Integer(-257))
            .insert_text("type", "public-key")
            .build_value();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_value(req_keys::PUB_KEY_CRED_PARAMS, Value::Array(vec![rs256]))
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::UnsupportedAlgorithm));
    }

    #[test]
    fn test_empty_pin_auth_waits_for_touch() {
        let mut ctx = context();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_bytes(req_keys::PIN_AUTH, &[])
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::PinNotSet));

        set_pin(&mut ctx, "1234").unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::PinAuthInvalid));
    }

    #[test]
    fn test_pin_required_and_verified() {
        let mut ctx = context();
        set_pin(&mut ctx, "1234").unwrap();

        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::PinRequired));

        let wrong = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_bytes(req_keys::PIN_AUTH, &[0u8; 16])
            .insert(req_keys::PIN_PROTOCOL, 1u8)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &wrong, &mut NoHost), Err(StatusCode::PinAuthInvalid));

        let token = get_pin_token(&mut ctx, "1234").unwrap();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_bytes(req_keys::PIN_AUTH, &pin_auth(&token, &CDH))
            .insert(req_keys::PIN_PROTOCOL, 1u8)
            .unwrap()
            .build()
            .unwrap();
        let auth_data = auth_data(&handle(&mut ctx, &request, &mut NoHost).unwrap());
        assert_eq!(auth_data[32], flags::UP | flags::UV | flags::AT);
    }

    #[test]
    fn test_options() {
        let mut ctx = context();
        for (name, value, expected) in [
            ("up", true, StatusCode::InvalidOption),
            ("up", false, StatusCode::InvalidOption),
            ("uv", true, StatusCode::UnsupportedOption),
        ] {
            let options = TextMapBuilder::new()
                .insert_value(name, Value::Bool(value))
                .build_value();
            let request = make_credential_request(&CDH, "example.com", b"alice", false)
                .insert_value(req_keys::OPTIONS, options)
                .build()
                .unwrap();
            assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(expected), "{name}={value}");
        }
    }

    #[test]
    fn test_exclude_list() {
        let mut ctx = context();
        let existing = register(&mut ctx, "example.com", b"alice", false);

        let malformed = Value::Integer(5);
        let unrelated = PublicKeyCredentialDescriptor::new(vec![0xAB; 68]).to_value();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_value(
                req_keys::EXCLUDE_LIST,
                Value::Array(vec![malformed.clone(), unrelated.clone()]),
            )
            .build()
            .unwrap();
        assert!(handle(&mut ctx, &request, &mut NoHost).is_ok());

        let excluded = PublicKeyCredentialDescriptor::new(existing.clone()).to_value();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_value(
                req_keys::EXCLUDE_LIST,
                Value::Array(vec![malformed, unrelated, excluded.clone()]),
            )
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::CredentialExcluded));

        // a credential for one relying party never excludes another
        let request = make_credential_request(&CDH, "other.example", b"alice", false)
            .insert_value(req_keys::EXCLUDE_LIST, Value::Array(vec![excluded]))
            .build()
            .unwrap();
        assert!(handle(&mut ctx, &request, &mut NoHost).is_ok());
    }

    #[test]
    fn test_resident_keys_deduplicate_per_user() {
        let mut ctx = context();
        register(&mut ctx, "example.com", b"alice", true);
        register(&mut ctx, "example.com", b"bob", true);
        assert_eq!(ctx.resident_key_count(), 2);

        let replacement = register(&mut ctx, "example.com", b"alice", true);
        assert_eq!(ctx.resident_key_count(), 2);
        let stored: Vec<Vec<u8>> = ctx
            .resident_keys()
            .into_iter()
            .map(|rk| rk.id.to_bytes().to_vec())
            .collect();
        assert!(stored.contains(&replacement));

        register(&mut ctx, "other.example", b"alice", true);
        assert_eq!(ctx.resident_key_count(), 3);
    }

    #[test]
    fn test_resident_key_table_full() {
        let config = AuthenticatorConfig::new().with_max_resident_keys(1);
        let mut ctx = context_with(config, MemoryStore::new());
        register(&mut ctx, "example.com", b"alice", true);
        let request = make_credential_request(&CDH, "example.com", b"bob", true)
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::KeyStoreFull));
        assert_eq!(ctx.resident_key_count(), 1);
    }

    #[test]
    fn test_presence_timeout() {
        let mut ctx = context();
        ctx.presence_mut().absent = true;
        let request = make_credential_request(&CDH, "example.com", b"alice", true)
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::ActionTimeout));
        assert_eq!(ctx.resident_key_count(), 0);
    }

    #[test]
    fn test_presence_cancelled() {
        let mut ctx = context();
        ctx.presence_mut().cancel_on_poll = Some(ctx.cancel_token());
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .build()
            .unwrap();
        assert_eq!(handle(&mut ctx, &request, &mut NoHost), Err(StatusCode::KeepaliveCancel));
    }

    #[test]
    fn test_hmac_secret_enabled() {
        let mut ctx = context();
        let ext = TextMapBuilder::new()
            .insert_value(extensions::HMAC_SECRET, Value::Bool(true))
            .build_value();
        let request = make_credential_request(&CDH, "example.com", b"alice", false)
            .insert_value(req_keys::EXTENSIONS, ext)
            .build()
            .unwrap();
        let auth_data = auth_data(&handle(&mut ctx, &request, &mut NoHost).unwrap());
        assert_eq!(auth_data[32] & flags::ED, flags::ED);
        let trailer = HmacSecretOutput::Enabled.encode().unwrap();
        assert!(auth_data.ends_with(&trailer));
    }
}
