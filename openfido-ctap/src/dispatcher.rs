//! CTAP2 request dispatcher
//!
//! Routes a raw CTAP2 request (command byte followed by CBOR) to its handler
//! and frames the result as `status || body`. Failed requests never carry a
//! body.

use alloc::vec;
use alloc::vec::Vec;

use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{HostChannel, NoHost, RecordStore, UserPresence};
use crate::commands::{self, CommandCode};
use crate::status::{Result, StatusCode};

/// Handle one CTAP2 request and return the framed response
///
/// `last_command` is updated on every exit so getNextAssertion is only
/// accepted straight after getAssertion.
pub fn ctap_request<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    request: &[u8],
) -> Vec<u8> {
    ctap_request_on(ctx, request, &mut NoHost)
}

/// [`ctap_request`] with keepalives and CANCEL carried over `host`
pub fn ctap_request_on<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    request: &[u8],
    host: &mut dyn HostChannel,
) -> Vec<u8> {
    let Some((&command, body)) = request.split_first() else {
        log::warn!("empty CTAP request");
        return vec![StatusCode::InvalidLength.to_u8()];
    };

    ctx.clear_cancel();
    let result = dispatch(ctx, command, body, host);

    ctx.last_command = match (CommandCode::from_u8(command), &result) {
        (Some(CommandCode::GetNextAssertion), Ok(_)) => Some(CommandCode::GetAssertion as u8),
        _ => Some(command),
    };

    match result {
        Ok(body) => {
            log::debug!("command {command:#04x} ok, {} byte response", body.len());
            let mut response = Vec::with_capacity(body.len() + 1);
            response.push(StatusCode::Success.to_u8());
            response.extend_from_slice(&body);
            response
        }
        Err(status) => {
            log::debug!("command {command:#04x} failed: {status}");
            vec![status.to_u8()]
        }
    }
}

fn dispatch<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
    command: u8,
    body: &[u8],
    host: &mut dyn HostChannel,
) -> Result<Vec<u8>> {
    let command = CommandCode::from_u8(command).ok_or(StatusCode::InvalidCommand)?;

    if matches!(
        command,
        CommandCode::MakeCredential | CommandCode::GetAssertion
    ) {
        if ctx.is_locked() {
            log::warn!("{command:?} refused: device locked");
            return Err(StatusCode::PinBlocked);
        }
        if ctx.is_boot_locked() {
            log::warn!("{command:?} refused: power cycle required");
            return Err(StatusCode::PinAuthBlocked);
        }
    }

    match command {
        CommandCode::MakeCredential => commands::make_credential::handle(ctx, body, host),
        CommandCode::GetAssertion => commands::get_assertion::handle(ctx, body, host),
        CommandCode::Cancel => Ok(Vec::new()),
        CommandCode::GetInfo => commands::get_info::handle(ctx),
        CommandCode::ClientPin => commands::client_pin::handle(ctx, body),
        CommandCode::Reset => commands::reset::handle(ctx, host),
        CommandCode::GetNextAssertion => {
            if ctx.last_command != Some(CommandCode::GetAssertion as u8) {
                return Err(StatusCode::NotAllowed);
            }
            commands::get_next_assertion::handle(ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::cbor::{MapBuilder, MapParser};
    use crate::commands::client_pin::{SubCommand, req_keys};
    use crate::testing::{context, get_assertion_request, register, set_pin};

    fn status(response: &[u8]) -> u8 {
        response[0]
    }

    #[test]
    fn test_get_info_round_trip() {
        let mut ctx = context();
        let response = ctap_request(&mut ctx, &[0x04]);
        assert_eq!(status(&response), 0x00);
        assert!(MapParser::from_bytes(&response[1..]).is_ok());
    }

    #[test]
    fn test_get_retries_wire_format() {
        let mut ctx = context();
        // {1: 1, 2: getRetries}
        let response = ctap_request(&mut ctx, &hex!("06 a2 01 01 02 01"));
        assert_eq!(response, hex!("00 a1 03 08"));
    }

    #[test]
    fn test_unknown_and_empty() {
        let mut ctx = context();
        assert_eq!(ctap_request(&mut ctx, &[0x05]), vec![0x01]);
        assert_eq!(ctap_request(&mut ctx, &[0x40, 0xA0]), vec![0x01]);
        assert_eq!(ctap_request(&mut ctx, &[]), vec![0x03]);
    }

    #[test]
    fn test_cancel_is_empty_success() {
        let mut ctx = context();
        assert_eq!(ctap_request(&mut ctx, &[0x03]), vec![0x00]);
    }

    #[test]
    fn test_errors_carry_no_body() {
        let mut ctx = context();
        // makeCredential with an empty map
        assert_eq!(ctap_request(&mut ctx, &[0x01, 0xA0]), vec![0x14]);
        // garbage CBOR
        let response = ctap_request(&mut ctx, &[0x02, 0xFF, 0x00]);
        assert_eq!(response.len(), 1);
        assert_ne!(response[0], 0x00);
    }

    #[test]
    fn test_get_next_assertion_gating() {
        let mut ctx = context();
        register(&mut ctx, "example.com", b"alice", true);
        register(&mut ctx, "example.com", b"bob", true);
        register(&mut ctx, "example.com", b"carol", true);

        assert_eq!(ctap_request(&mut ctx, &[0x08]), vec![0x30]);

        let mut request = vec![0x02];
        request.extend(
            get_assertion_request(&[0x33; 32], "example.com", &[])
                .build()
                .unwrap(),
        );
        assert_eq!(status(&ctap_request(&mut ctx, &request)), 0x00);
        assert_eq!(status(&ctap_request(&mut ctx, &[0x08])), 0x00);
        assert_eq!(status(&ctap_request(&mut ctx, &[0x08])), 0x00);
        // queue drained
        assert_eq!(ctap_request(&mut ctx, &[0x08]), vec![0x30]);

        assert_eq!(status(&ctap_request(&mut ctx, &request)), 0x00);
        assert_eq!(status(&ctap_request(&mut ctx, &[0x04])), 0x00);
        // anything in between breaks the chain
        assert_eq!(ctap_request(&mut ctx, &[0x08]), vec![0x30]);
    }

    #[test]
    fn test_boot_lock_gates_credentials() {
        let mut ctx = context();
        set_pin(&mut ctx, "1234").unwrap();

        let bad_token_request = |ctx: &mut crate::testing::TestContext| {
            let platform = crate::testing::Platform::new(ctx);
            let body = MapBuilder::new()
                .insert(req_keys::PIN_PROTOCOL, 1u8)
                .unwrap()
                .insert(req_keys::SUB_COMMAND, SubCommand::GetPinToken as u8)
                .unwrap()
                .insert_value(req_keys::KEY_AGREEMENT, platform.cose())
                .insert_bytes(req_keys::PIN_HASH_ENC, &platform.pin_hash_enc("9999"))
                .build()
                .unwrap();
            let mut request = vec![0x06];
            request.extend(body);
            ctap_request(ctx, &request)
        };

        assert_eq!(bad_token_request(&mut ctx), vec![0x31]);
        assert_eq!(bad_token_request(&mut ctx), vec![0x31]);
        assert_eq!(bad_token_request(&mut ctx), vec![0x34]);

        assert_eq!(ctap_request(&mut ctx, &[0x01, 0xA0]), vec![0x34]);
        assert_eq!(ctap_request(&mut ctx, &[0x02, 0xA0]), vec![0x34]);
        // getInfo still answers
        assert_eq!(status(&ctap_request(&mut ctx, &[0x04])), 0x00);
    }

    #[test]
    fn test_stale_cancel_is_dropped() {
        let mut ctx = context();
        ctx.cancel_token().cancel();
        let mut request = vec![0x01];
        request.extend(
            crate::testing::make_credential_request(&[0x44; 32], "example.com", b"alice", false)
                .build()
                .unwrap(),
        );
        assert_eq!(status(&ctap_request(&mut ctx, &request)), 0x00);
    }
}
