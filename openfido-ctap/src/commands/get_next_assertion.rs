//! authenticatorGetNextAssertion command
//!
//! Answers with the next credential queued by the last getAssertion, under a
//! fresh signature counter. Only valid directly after getAssertion or another
//! getNextAssertion; the dispatcher enforces that.

use alloc::vec::Vec;

use super::get_assertion::assertion_response;
use crate::authenticator::AuthenticatorContext;
use crate::callbacks::{RecordStore, UserPresence};
use crate::status::{Result, StatusCode};

pub fn handle<S: RecordStore, P: UserPresence>(
    ctx: &mut AuthenticatorContext<S, P>,
) -> Result<Vec<u8>> {
    let Some(candidate) = ctx.assertion.pop() else {
        log::debug!("no assertions left");
        return Err(StatusCode::NotAllowed);
    };

    let mut auth_data = ctx.assertion.auth_data_header;
    let count = ctx.advance_counter()?;
    auth_data[33..37].copy_from_slice(&count.to_be_bytes());

    let client_data_hash = ctx.assertion.client_data_hash;
    let disclose = ctx.assertion.user_verified;
    assertion_response(ctx, &candidate, &auth_data, &client_data_hash, disclose, None)
}
