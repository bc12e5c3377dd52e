//! Request entities shared by makeCredential and getAssertion

use crate::cbor::{self, Value};
use crate::status::{Result, StatusCode};

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

/// Longest user handle accepted
pub const USER_ID_MAX_SIZE: usize = 64;
/// Longest stored `user.name`
pub const USER_NAME_LIMIT: usize = 64;
/// Longest stored `user.displayName`
pub const DISPLAY_NAME_LIMIT: usize = 64;
/// Longest stored `user.icon`
pub const ICON_LIMIT: usize = 128;
/// Longest relying-party id
pub const DOMAIN_NAME_MAX_SIZE: usize = 253;

pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// Relying party entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            icon: None,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let rp: Self = cbor::from_value(value)?;
        if rp.id.is_empty() || rp.id.len() > DOMAIN_NAME_MAX_SIZE {
            return Err(StatusCode::InvalidLength);
        }
        Ok(rp)
    }
}

/// User entity
///
/// Text fields are truncated to their storage limits on parse so a resident
/// key record always fits its slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl User {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let mut user: Self = cbor::from_value(value)?;
        if user.id.len() > USER_ID_MAX_SIZE {
            return Err(StatusCode::InvalidLength);
        }
        truncate(&mut user.name, USER_NAME_LIMIT);
        truncate(&mut user.display_name, DISPLAY_NAME_LIMIT);
        truncate(&mut user.icon, ICON_LIMIT);
        Ok(user)
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Drop every identifying field except the handle
    pub fn strip_identity(&mut self) {
        self.name = None;
        self.display_name = None;
        self.icon = None;
    }

    /// Encode as the `user` member of an assertion response
    ///
    /// Name, display name and icon are only disclosed when `disclose` is set
    /// and a name is present.
    pub fn to_value(&self, disclose: bool) -> Value {
        let mut builder = cbor::TextMapBuilder::new().insert_bytes("id", &self.id);
        if disclose && self.has_name() {
            if let Some(name) = &self.name {
                builder = builder.insert_text("name", name);
            }
            if let Some(display_name) = &self.display_name {
                builder = builder.insert_text("displayName", display_name);
            }
            if let Some(icon) = &self.icon {
                builder = builder.insert_text("icon", icon);
            }
        }
        builder.build_value()
    }
}

fn truncate(field: &mut Option<String>, limit: usize) {
    if let Some(s) = field
        && s.len() > limit
    {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}

/// Credential descriptor from an allow list or exclude list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub cred_type: String,

    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

impl PublicKeyCredentialDescriptor {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            cred_type: String::from(PUBLIC_KEY_TYPE),
            id,
        }
    }

    pub fn is_public_key(&self) -> bool {
        self.cred_type == PUBLIC_KEY_TYPE
    }

    pub fn to_value(&self) -> Value {
        cbor::TextMapBuilder::new()
            .insert_bytes("id", &self.id)
            .insert_text("type", &self.cred_type)
            .build_value()
    }

    /// Parse an allow/exclude list array
    pub fn list_from_value(value: &Value) -> Result<Vec<Self>> {
        let Value::Array(items) = value else {
            return Err(StatusCode::CborUnexpectedType);
        };
        items.iter().map(cbor::from_value).collect()
    }
}

/// One entry of `pubKeyCredParams`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub cred_type: String,

    pub alg: i64,
}

impl PublicKeyCredentialParameters {
    pub fn es256() -> Self {
        Self {
            cred_type: String::from(PUBLIC_KEY_TYPE),
            alg: CoseAlgorithm::ES256 as i64,
        }
    }
}

/// The `options` map of makeCredential and getAssertion
///
/// Each entry is `None` when absent so callers can tell "not sent" from
/// "sent as false".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub rk: Option<bool>,
    pub up: Option<bool>,
    pub uv: Option<bool>,
}

impl RequestOptions {
    /// Unknown options are ignored; known ones must be booleans
    pub fn from_value(value: &Value) -> Result<Self> {
        if !matches!(value, Value::Map(_)) {
            return Err(StatusCode::CborUnexpectedType);
        }
        let flag = |name: &str| -> Result<Option<bool>> {
            match cbor::text_map_get(value, name) {
                Some(Value::Bool(b)) => Ok(Some(*b)),
                Some(_) => Err(StatusCode::CborUnexpectedType),
                None => Ok(None),
            }
        };
        Ok(Self {
            rk: flag("rk")?,
            up: flag("up")?,
            uv: flag("uv")?,
        })
    }
}

/// COSE algorithm identifiers this authenticator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum CoseAlgorithm {
    /// ECDSA P-256 with SHA-256
    ES256 = -7,
    /// ECDH-ES with HKDF-256, used for key agreement keys
    EcdhEsHkdf256 = -25,
}
