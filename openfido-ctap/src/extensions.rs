//! hmac-secret extension
//!
//! makeCredential: `{"hmac-secret": true}` marks the credential and echoes
//! `true`. getAssertion: the platform sends a key-agreement key, one or two
//! encrypted 32-byte salts and a MAC over them; the authenticator answers with
//! `HMAC(credRandom, salt)` for each salt, encrypted under the shared secret.

use alloc::vec::Vec;

use openfido_crypto::{kdf, pin_protocol};

use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{RecordStore, UserPresence};
use crate::cbor::{self, TextMapBuilder, Value};
use crate::credential::CredentialId;
use crate::status::{Result, StatusCode};

pub const HMAC_SECRET: &str = "hmac-secret";

/// Keys of the getAssertion hmac-secret input map
mod keys {
    pub const KEY_AGREEMENT: i64 = 0x01;
    pub const SALT_ENC: i64 = 0x02;
    pub const SALT_AUTH: i64 = 0x03;
}

const SALT_LEN: usize = 32;

/// Extension outputs to splice into authenticator data
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HmacSecretOutput {
    /// makeCredential acknowledgement
    Enabled,
    /// Encrypted getAssertion output
    Secret(Vec<u8>),
}

impl HmacSecretOutput {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = match self {
            Self::Enabled => Value::Bool(true),
            Self::Secret(bytes) => Value::Bytes(bytes.clone()),
        };
        TextMapBuilder::new().insert_value(HMAC_SECRET, value).build()
    }
}

/// True when a makeCredential `extensions` map asks for hmac-secret.
/// Unknown extensions are ignored.
pub(crate) fn make_credential_requested(extensions: &Value) -> Result<bool> {
    if !matches!(extensions, Value::Map(_)) {
        return Err(StatusCode::CborUnexpectedType);
    }
    match cbor::text_map_get(extensions, HMAC_SECRET) {
        Some(Value::Bool(requested)) => Ok(*requested),
        Some(_) => Err(StatusCode::CborUnexpectedType),
        None => Ok(false),
    }
}

/// Parsed getAssertion hmac-secret input
#[derive(Debug, Clone)]
pub(crate) struct HmacSecretInput {
    key_agreement: Value,
    salt_enc: Vec<u8>,
    salt_auth: Vec<u8>,
}

impl HmacSecretInput {
    /// Pull the hmac-secret input out of a getAssertion `extensions` map
    pub fn from_extensions(extensions: &Value) -> Result<Option<Self>> {
        if !matches!(extensions, Value::Map(_)) {
            return Err(StatusCode::CborUnexpectedType);
        }
        let Some(input) = cbor::text_map_get(extensions, HMAC_SECRET) else {
            return Ok(None);
        };
        let key_agreement = cbor::int_map_get(input, keys::KEY_AGREEMENT)
            .ok_or(StatusCode::MissingParameter)?
            .clone();
        let bytes = |key: i64| -> Result<Vec<u8>> {
            match cbor::int_map_get(input, key) {
                Some(Value::Bytes(b)) => Ok(b.clone()),
                Some(_) => Err(StatusCode::CborUnexpectedType),
                None => Err(StatusCode::MissingParameter),
            }
        };
        let salt_enc = bytes(keys::SALT_ENC)?;
        let salt_auth = bytes(keys::SALT_AUTH)?;
        if salt_enc.len() != SALT_LEN && salt_enc.len() != 2 * SALT_LEN {
            return Err(StatusCode::InvalidLength);
        }
        if salt_auth.len() != pin_protocol::AUTH_TAG_SIZE {
            return Err(StatusCode::InvalidLength);
        }
        Ok(Some(Self {
            key_agreement,
            salt_enc,
            salt_auth,
        }))
    }

    /// Compute the encrypted output for `credential`
    pub fn process<S: RecordStore, P: UserPresence>(
        &self,
        ctx: &AuthenticatorContext<S, P>,
        credential: &CredentialId,
    ) -> Result<HmacSecretOutput> {
        let shared = ctx.shared_secret(&self.key_agreement)?;

        if !pin_protocol::verify(&shared, &[&self.salt_enc], &self.salt_auth)? {
            log::warn!("hmac-secret saltAuth mismatch");
            return Err(StatusCode::ExtensionFirst);
        }

        let cred_random = ctx.credential_random(credential)?;
        let salts = pin_protocol::decrypt(&shared, &self.salt_enc)?;

        let mut output = Vec::with_capacity(salts.len());
        for salt in salts.chunks(SALT_LEN) {
            output.extend_from_slice(&kdf::hmac_sha256(&cred_random, &[salt])?);
        }
        Ok(HmacSecretOutput::Secret(pin_protocol::encrypt(&shared, &output)?))
    }
}
