//! authenticatorGetInfo command
//!
//! Reports versions, extensions, AAGUID, options, the maximum message size
//! and the supported PIN protocols. Takes no parameters.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{RecordStore, UserPresence};
use crate::cbor::{MapBuilder, TextMapBuilder, Value};
use crate::extensions::HMAC_SECRET;
use crate::status::Result;

/// GetInfo response keys
mod keys {
    pub const VERSIONS: i64 = 0x01;
    pub const EXTENSIONS: i64 = 0x02;
    pub const AAGUID: i64 = 0x03;
    pub const OPTIONS: i64 = 0x04;
    pub const MAX_MSG_SIZE: i64 = 0x05;
    pub const PIN_PROTOCOLS: i64 = 0x06;
}

pub const VERSION_U2F: &str = "U2F_V2";
pub const VERSION_FIDO2: &str = "FIDO_2_0";

pub fn handle<S: RecordStore, P: UserPresence>(ctx: &AuthenticatorContext<S, P>) -> Result<Vec<u8>> {
    let config = ctx.config();

    let versions = Value::Array(vec![
        Value::Text(String::from(VERSION_U2F)),
        Value::Text(String::from(VERSION_FIDO2)),
    ]);
    let extensions = Value::Array(vec![Value::Text(String::from(HMAC_SECRET))]);

    let options = TextMapBuilder::new()
        .insert_value("rk", Value::Bool(true))
        .insert_value("up", Value::Bool(true))
        .insert_value("plat", Value::Bool(false))
        .insert_value("clientPin", Value::Bool(ctx.is_pin_set()))
        .build_value();

    MapBuilder::new()
        .insert_value(keys::VERSIONS, versions)
        .insert_value(keys::EXTENSIONS, extensions)
        .insert_bytes(keys::AAGUID, &config.aaguid)
        .insert_value(keys::OPTIONS, options)
        .insert(keys::MAX_MSG_SIZE, config.max_msg_size as u64)?
        .insert_value(keys::PIN_PROTOCOLS, Value::Array(vec![Value::Integer(1)]))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::{self, MapParser};
    use crate::testing::context;

    #[test]
    fn test_get_info_fields() {
        let ctx = context();
        let response = handle(&ctx).unwrap();
        let parsed = MapParser::from_bytes(&response).unwrap();

        let versions: Vec<String> = parsed.get(keys::VERSIONS).unwrap();
        assert_eq!(versions, vec!["U2F_V2", "FIDO_2_0"]);

        let extensions: Vec<String> = parsed.get(keys::EXTENSIONS).unwrap();
        assert_eq!(extensions, vec!["hmac-secret"]);

        assert_eq!(parsed.get_bytes(keys::AAGUID).unwrap(), ctx.config().aaguid);
        assert_eq!(parsed.get_int_opt(keys::MAX_MSG_SIZE).unwrap(), Some(1200));

        let protocols: Vec<u8> = parsed.get(keys::PIN_PROTOCOLS).unwrap();
        assert_eq!(protocols, vec![1]);

        let options = parsed.get_raw(keys::OPTIONS).unwrap();
        assert_eq!(cbor::text_map_get(options, "rk"), Some(&Value::Bool(true)));
        assert_eq!(cbor::text_map_get(options, "up"), Some(&Value::Bool(true)));
        assert_eq!(cbor::text_map_get(options, "plat"), Some(&Value::Bool(false)));
        assert_eq!(
            cbor::text_map_get(options, "clientPin"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_options_are_canonically_ordered() {
        let ctx = context();
        let parsed = MapParser::from_bytes(&handle(&ctx).unwrap()).unwrap();
        let Some(Value::Map(entries)) = parsed.get_raw(keys::OPTIONS) else {
            panic!("options is not a map");
        };
        let names: Vec<&str> = entries
            .iter()
            .map(|(k, _)| match k {
                Value::Text(t) => t.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(names, vec!["rk", "up", "plat", "clientPin"]);
    }
}
