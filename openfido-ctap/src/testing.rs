//! Test fixtures: a scripted presence sensor, a stepping clock and a
//! platform-side PIN protocol peer.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::Cell;

use openfido_crypto::{ecdh::KeyPair, pin_protocol};
use sha2::{Digest, Sha256};

use crate::authenticator::{AuthenticatorConfig, AuthenticatorContext};
use crate::callbacks::{KeepaliveStatus, NoHost, RecordStore, UserPresence};
use crate::cbor::{self, MapBuilder, MapParser, TextMapBuilder, Value};
use crate::commands::client_pin::{self, SubCommand, req_keys, resp_keys};
use crate::extensions::HMAC_SECRET;
use crate::status::{Result, StatusCode};
use crate::store::MemoryStore;
use crate::wait::Clock;

/// Clock that advances a fixed step each time it is read
pub(crate) struct StepClock {
    now: Cell<u64>,
    step: u64,
}

impl StepClock {
    pub(crate) fn new(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }
}

impl Clock for StepClock {
    fn now_ms(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// Presence sensor that is either always or never touched
#[derive(Debug, Default)]
pub(crate) struct TestPresence {
    pub absent: bool,
    pub prompts: usize,
    pub keepalives: Vec<KeepaliveStatus>,
    /// Raise this token on the first poll
    pub cancel_on_poll: Option<crate::wait::CancelToken>,
}

impl UserPresence for TestPresence {
    fn poll_presence(&mut self) -> bool {
        if let Some(token) = self.cancel_on_poll.take() {
            token.cancel();
            return false;
        }
        !self.absent
    }

    fn prompt(&mut self) {
        self.prompts += 1;
    }

    fn keepalive(&mut self, status: KeepaliveStatus) {
        self.keepalives.push(status);
    }
}

pub(crate) type TestContext = AuthenticatorContext<MemoryStore, TestPresence>;

pub(crate) fn context() -> TestContext {
    context_with(AuthenticatorConfig::new(), MemoryStore::new())
}

pub(crate) fn context_with<S: RecordStore>(
    config: AuthenticatorConfig,
    store: S,
) -> AuthenticatorContext<S, TestPresence> {
    let ctx = AuthenticatorContext::with_clock(
        config,
        store,
        TestPresence::default(),
        Box::new(StepClock::new(1000)),
    );
    match ctx {
        Ok(ctx) => ctx,
        Err(err) => panic!("context boot failed: {err}"),
    }
}

/// Power cycle: same store and configuration, fresh volatile state
pub(crate) fn reboot(ctx: TestContext) -> TestContext {
    let config = ctx.config().clone();
    context_with(config, ctx.into_store())
}

/// The platform half of PIN protocol one
pub(crate) struct Platform {
    key: KeyPair,
    shared: [u8; 32],
}

impl Platform {
    pub fn new<S: RecordStore, P: UserPresence>(ctx: &AuthenticatorContext<S, P>) -> Self {
        let key = KeyPair::generate();
        let (x, y) = cbor::parse_cose_ec2_key(&ctx.key_agreement_cose()).unwrap();
        let raw = key.shared_secret_cose(&x, &y).unwrap();
        Self {
            key,
            shared: pin_protocol::derive_shared_key(&raw),
        }
    }

    pub fn cose(&self) -> Value {
        let (x, y) = self.key.public_key_cose();
        cbor::cose_ec2_key(-25, &x, &y)
    }

    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        pin_protocol::encrypt(&self.shared, data).unwrap()
    }

    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        pin_protocol::decrypt(&self.shared, data).unwrap()
    }

    pub fn auth(&self, parts: &[&[u8]]) -> [u8; 16] {
        pin_protocol::authenticate(&self.shared, parts).unwrap()
    }

    pub fn new_pin_enc(&self, pin: &str) -> Vec<u8> {
        let mut padded = [0u8; 64];
        padded[..pin.len()].copy_from_slice(pin.as_bytes());
        self.encrypt(&padded)
    }

    pub fn pin_hash_enc(&self, pin: &str) -> Vec<u8> {
        let hash = Sha256::digest(pin.as_bytes());
        self.encrypt(&hash[..16])
    }

    /// getAssertion `extensions` value carrying an hmac-secret request
    pub fn hmac_secret_extension(&self, salts: &[u8]) -> Value {
        let salt_enc = self.encrypt(salts);
        let salt_auth = self.auth(&[&salt_enc]);
        let input = MapBuilder::new()
            .insert_value(1, self.cose())
            .insert_bytes(2, &salt_enc)
            .insert_bytes(3, &salt_auth)
            .build_value();
        TextMapBuilder::new()
            .insert_value(HMAC_SECRET, input)
            .build_value()
    }
}

fn client_pin_request(sub: SubCommand) -> MapBuilder {
    MapBuilder::new()
        .insert(req_keys::PIN_PROTOCOL, 1u8)
        .unwrap()
        .insert(req_keys::SUB_COMMAND, sub as u8)
        .unwrap()
}

pub(crate) fn set_pin<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    pin: &str,
) -> Result<()> {
    let platform = Platform::new(ctx);
    let new_pin_enc = platform.new_pin_enc(&pin[..pin.len().min(64)]);
    let pin_auth = platform.auth(&[&new_pin_enc]);
    let request = client_pin_request(SubCommand::SetPin)
        .insert_value(req_keys::KEY_AGREEMENT, platform.cose())
        .insert_bytes(req_keys::PIN_AUTH, &pin_auth)
        .insert_bytes(req_keys::NEW_PIN_ENC, &new_pin_enc)
        .build()
        .unwrap();
    client_pin::handle(ctx, &request).map(|_| ())
}

pub(crate) fn change_pin(ctx: &mut TestContext, old: &str, new: &str) -> Result<()> {
    let platform = Platform::new(ctx);
    let new_pin_enc = platform.new_pin_enc(new);
    let pin_hash_enc = platform.pin_hash_enc(old);
    let pin_auth = platform.auth(&[&new_pin_enc, &pin_hash_enc]);
    let request = client_pin_request(SubCommand::ChangePin)
        .insert_value(req_keys::KEY_AGREEMENT, platform.cose())
        .insert_bytes(req_keys::PIN_AUTH, &pin_auth)
        .insert_bytes(req_keys::NEW_PIN_ENC, &new_pin_enc)
        .insert_bytes(req_keys::PIN_HASH_ENC, &pin_hash_enc)
        .build()
        .unwrap();
    client_pin::handle(ctx, &request).map(|_| ())
}

pub(crate) fn get_pin_token<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    pin: &str,
) -> Result<[u8; 16]> {
    let platform = Platform::new(ctx);
    let request = client_pin_request(SubCommand::GetPinToken)
        .insert_value(req_keys::KEY_AGREEMENT, platform.cose())
        .insert_bytes(req_keys::PIN_HASH_ENC, &platform.pin_hash_enc(pin))
        .build()
        .unwrap();
    let response = client_pin::handle(ctx, &request)?;
    let parsed = MapParser::from_bytes(&response)?;
    let token = platform.decrypt(&parsed.get_bytes(resp_keys::PIN_TOKEN)?);
    token.try_into().map_err(|_| StatusCode::InvalidLength)
}

/// `pinAuth` for makeCredential / getAssertion
pub(crate) fn pin_auth(token: &[u8; 16], client_data_hash: &[u8]) -> [u8; 16] {
    pin_protocol::authenticate(token, &[client_data_hash]).unwrap()
}

/// makeCredential request with ES256 and optional `rk`
pub(crate) fn make_credential_request(
    client_data_hash: &[u8; 32],
    rp_id: &str,
    user_id: &[u8],
    rk: bool,
) -> MapBuilder {
    use crate::commands::make_credential::req_keys;

    let rp = TextMapBuilder::new().insert_text("id", rp_id).build_value();
    let user = TextMapBuilder::new()
        .insert_bytes("id", user_id)
        .insert_text("name", "user@example.com")
        .insert_text("displayName", "Example User")
        .build_value();
    let es256 = TextMapBuilder::new()
        .insert_value("alg", Value::Integer(-7))
        .insert_text("type", "public-key")
        .build_value();
    let mut builder = MapBuilder::new()
        .insert_bytes(req_keys::CLIENT_DATA_HASH, client_data_hash)
        .insert_value(req_keys::RP, rp)
        .insert_value(req_keys::USER, user)
        .insert_value(req_keys::PUB_KEY_CRED_PARAMS, Value::Array(alloc::vec![es256]));
    if rk {
        let options = TextMapBuilder::new()
            .insert_value("rk", Value::Bool(true))
            .build_value();
        builder = builder.insert_value(req_keys::OPTIONS, options);
    }
    builder
}

/// Register a credential and return its id
pub(crate) fn register(ctx: &mut TestContext, rp_id: &str, user_id: &[u8], rk: bool) -> Vec<u8> {
    use crate::commands::make_credential::{self, CREDENTIAL_ID_OFFSET};
    use crate::credential::CREDENTIAL_ID_SIZE;

    let request = make_credential_request(&[0x42; 32], rp_id, user_id, rk)
        .build()
        .unwrap();
    let response = make_credential::handle(ctx, &request, &mut NoHost).unwrap();
    let auth_data = MapParser::from_bytes(&response).unwrap().get_bytes(2).unwrap();
    auth_data[CREDENTIAL_ID_OFFSET..CREDENTIAL_ID_OFFSET + CREDENTIAL_ID_SIZE].to_vec()
}

/// getAssertion request; an empty `allow` leaves the allow list out
pub(crate) fn get_assertion_request(
    client_data_hash: &[u8; 32],
    rp_id: &str,
    allow: &[Vec<u8>],
) -> MapBuilder {
    use crate::commands::get_assertion::req_keys;
    use crate::types::PublicKeyCredentialDescriptor;

    let builder = MapBuilder::new()
        .insert_value(req_keys::RP_ID, Value::Text(rp_id.into()))
        .insert_bytes(req_keys::CLIENT_DATA_HASH, client_data_hash);
    if allow.is_empty() {
        return builder;
    }
    let allow_list = allow
        .iter()
        .map(|id| PublicKeyCredentialDescriptor::new(id.clone()).to_value())
        .collect();
    builder.insert_value(req_keys::ALLOW_LIST, Value::Array(allow_list))
}
