//! Shared request builders and response parsers for device tests

#![allow(dead_code)]

use openfido_ctap::cbor::{MapBuilder, MapParser, TextMapBuilder, Value};
use openfido_ctap::commands::{CommandCode, get_assertion, make_credential};
use openfido_ctap::types::PublicKeyCredentialDescriptor;
use sha2::{Digest, Sha256};

pub const RP_ID: &str = "example.com";

pub fn client_data_hash(challenge: &str) -> [u8; 32] {
    let json = format!(r#"{{"type":"webauthn.get","challenge":"{challenge}","origin":"https://{RP_ID}"}}"#);
    Sha256::digest(json.as_bytes()).into()
}

fn with_command(command: CommandCode, body: MapBuilder) -> Vec<u8> {
    let mut request = vec![command as u8];
    request.extend(body.build().unwrap());
    request
}

/// Raw makeCredential request (command byte included) for ES256
pub fn make_credential(client_data_hash: &[u8; 32], user_id: &[u8], rk: bool) -> Vec<u8> {
    use make_credential::req_keys;

    let rp = TextMapBuilder::new()
        .insert_text("id", RP_ID)
        .insert_text("name", "Example")
        .build_value();
    let user = TextMapBuilder::new()
        .insert_bytes("id", user_id)
        .insert_text("name", "alice@example.com")
        .insert_text("displayName", "Alice")
        .build_value();
    let es256 = TextMapBuilder::new()
        .insert_value("alg", Value::Integer(-7))
        .insert_text("type", "public-key")
        .build_value();

    let mut body = MapBuilder::new()
        .insert_bytes(req_keys::CLIENT_DATA_HASH, client_data_hash)
        .insert_value(req_keys::RP, rp)
        .insert_value(req_keys::USER, user)
        .insert_value(req_keys::PUB_KEY_CRED_PARAMS, Value::Array(vec![es256]));
    if rk {
        let options = TextMapBuilder::new()
            .insert_value("rk", Value::Bool(true))
            .build_value();
        body = body.insert_value(req_keys::OPTIONS, options);
    }
    with_command(CommandCode::MakeCredential, body)
}

/// Raw getAssertion request; an empty `allow` leaves the allow list out
pub fn get_assertion(client_data_hash: &[u8; 32], allow: &[Vec<u8>]) -> Vec<u8> {
    use get_assertion::req_keys;

    let mut body = MapBuilder::new()
        .insert_value(req_keys::RP_ID, Value::Text(RP_ID.into()))
        .insert_bytes(req_keys::CLIENT_DATA_HASH, client_data_hash);
    if !allow.is_empty() {
        let list = allow
            .iter()
            .map(|id| PublicKeyCredentialDescriptor::new(id.clone()).to_value())
            .collect();
        body = body.insert_value(req_keys::ALLOW_LIST, Value::Array(list));
    }
    with_command(CommandCode::GetAssertion, body)
}

/// Split `status || body` and parse the body as an integer-keyed map
pub fn parse_success(response: &[u8]) -> MapParser {
    assert_eq!(response[0], 0x00, "status {:#04x}", response[0]);
    MapParser::from_bytes(&response[1..]).unwrap()
}

/// The parts of authenticator data the tests look at
pub struct AuthData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub counter: u32,
    pub credential_id: Option<Vec<u8>>,
    /// Uncompressed SEC1 credential public key
    pub public_key: Option<Vec<u8>>,
}

impl AuthData {
    pub fn parse(bytes: &[u8]) -> Self {
        let mut auth = AuthData {
            rp_id_hash: bytes[..32].try_into().unwrap(),
            flags: bytes[32],
            counter: u32::from_be_bytes(bytes[33..37].try_into().unwrap()),
            credential_id: None,
            public_key: None,
        };
        if auth.flags & 0x40 != 0 {
            let id_len = u16::from_be_bytes([bytes[53], bytes[54]]) as usize;
            let id = bytes[55..55 + id_len].to_vec();
            let cose: Value = openfido_ctap::cbor::decode(&bytes[55 + id_len..]).unwrap();
            let (x, y) = openfido_ctap::cbor::parse_cose_ec2_key(&cose).unwrap();
            auth.public_key = Some([&[0x04][..], &x, &y].concat());
            auth.credential_id = Some(id);
        }
        auth
    }
}

pub fn credential_id_of(assertion: &MapParser) -> Vec<u8> {
    let credential = assertion.get_raw(get_assertion::resp_keys::CREDENTIAL).unwrap();
    match openfido_ctap::cbor::text_map_get(credential, "id") {
        Some(Value::Bytes(id)) => id.clone(),
        other => panic!("credential id missing: {other:?}"),
    }
}
