//! CTAP2 command handlers
//!
//! Each handler takes the shared [`crate::AuthenticatorContext`] and the CBOR
//! request body (without the command byte) and returns the CBOR response
//! body. The status byte is added by [`crate::dispatcher::ctap_request`].

pub mod client_pin;
pub mod get_assertion;
pub mod get_info;
pub mod get_next_assertion;
pub mod make_credential;
pub mod reset;

/// CTAP2 command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    MakeCredential = 0x01,
    GetAssertion = 0x02,
    Cancel = 0x03,
    GetInfo = 0x04,
    ClientPin = 0x06,
    Reset = 0x07,
    GetNextAssertion = 0x08,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::MakeCredential),
            0x02 => Some(Self::GetAssertion),
            0x03 => Some(Self::Cancel),
            0x04 => Some(Self::GetInfo),
            0x06 => Some(Self::ClientPin),
            0x07 => Some(Self::Reset),
            0x08 => Some(Self::GetNextAssertion),
            _ => None,
        }
    }
}

/// Authenticator data flags
pub(crate) mod flags {
    pub const UP: u8 = 0x01;
    pub const UV: u8 = 0x04;
    pub const AT: u8 = 0x40;
    pub const ED: u8 = 0x80;
}

/// `pinAuth` handling shared by makeCredential and getAssertion
///
/// An explicitly empty `pinAuth` asks "is a PIN set?": after a touch the
/// answer is `PinAuthInvalid` when one is, `PinNotSet` otherwise.
pub(crate) fn empty_pin_auth_touch<S, P>(
    ctx: &mut crate::AuthenticatorContext<S, P>,
    host: &mut dyn crate::HostChannel,
) -> crate::Result<()>
where
    S: crate::RecordStore,
    P: crate::UserPresence,
{
    ctx.require_user_presence(host)?;
    if ctx.is_pin_set() {
        Err(crate::StatusCode::PinAuthInvalid)
    } else {
        Err(crate::StatusCode::PinNotSet)
    }
}
