//! Transport framing for the openfido authenticator
//!
//! Turns transport bytes into complete authenticator requests and responses
//! back into transport bytes:
//!
//! - CTAPHID framing, reassembly and the channel arena (`hid`)
//! - BLE GATT fragment reassembly and notification framing (`ble`)
//! - ISO 7816 APDU decoding, applet selection and response chaining (`nfc`)
//! - Linux UHID virtual device backing for the HID link (`uhid`)
//!
//! Every transport implements [`Transport`] and hands completed requests to a
//! [`CommandHandler`].

#[cfg(feature = "ble")]
pub mod ble;
pub mod channel;
pub mod ctaphid;
pub mod error;
pub mod handler;
#[cfg(feature = "hid")]
pub mod hid;
#[cfg(feature = "nfc")]
pub mod nfc;
pub mod transport;
#[cfg(all(feature = "uhid", target_os = "linux"))]
pub mod uhid;

#[cfg(feature = "ble")]
pub use ble::{BleLink, BleSession, BleTransport};
pub use channel::{ChannelState, ChannelTable};
pub use ctaphid::{Cmd, ErrorCode, Message, Packet};
pub use error::{Error, Result};
pub use handler::{CommandHandler, CtapHidHandler, Detached, RequestChannel};
#[cfg(feature = "hid")]
pub use hid::{HidLink, HidTransport};
#[cfg(feature = "nfc")]
pub use nfc::{NfcEvent, NfcLink, NfcSession, NfcTransport};
pub use transport::{Transport, poll_all};
#[cfg(all(feature = "uhid", target_os = "linux"))]
pub use uhid::UhidDevice;
