//! Collaborator traits for user interaction and record storage
//!
//! The engine never touches a button, an LED or a flash page directly. Boards
//! and hosted front-ends plug in through the traits below.

use alloc::string::String;
use alloc::vec::Vec;

use crate::status::StatusCode;

/// Outcome of a user presence test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpResult {
    /// The user touched the authenticator within the window
    Accepted,
    /// Presence checks are switched off for this request (`up=false`)
    Disabled,
    /// A CANCEL arrived while waiting
    Canceled,
    /// Nobody touched the authenticator in time
    Timeout,
}

impl UpResult {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }

    /// Map the outcome onto the status a command reports.
    ///
    /// `Disabled` maps to `Processing`, which callers read as "continue
    /// without the UP flag".
    pub fn into_status(self) -> Result<(), StatusCode> {
        match self {
            Self::Accepted => Ok(()),
            Self::Disabled => Err(StatusCode::Processing),
            Self::Canceled => Err(StatusCode::KeepaliveCancel),
            Self::Timeout => Err(StatusCode::ActionTimeout),
        }
    }
}

/// Keepalive hint forwarded to the active transport while a request runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeepaliveStatus {
    Processing = 0x01,
    UpNeeded = 0x02,
}

/// Button, LED and power hooks used during a presence wait
pub trait UserPresence {
    /// Non-blocking sample of the presence sensor
    fn poll_presence(&mut self) -> bool;

    /// Called once when the engine starts waiting for a touch
    fn prompt(&mut self) {}

    /// Forward a keepalive to the host; transports without keepalives ignore it
    fn keepalive(&mut self, _status: KeepaliveStatus) {}

    /// Low-power wait between polls
    fn idle(&mut self) {}

    /// Called once the wait has finished, whatever the outcome
    fn done(&mut self) {}

    /// Flash an indicator so the user can pick this device out
    fn wink(&mut self) {}
}

/// The link a request arrived on, serviced while the engine waits
///
/// Transports that can talk to the host mid-request implement this to carry
/// keepalives out and to notice a CANCEL before the wait ends.
pub trait HostChannel {
    /// Send a keepalive frame to the host
    fn keepalive(&mut self, status: KeepaliveStatus);

    /// Drain pending host traffic; true once the host asked to cancel
    fn cancel_requested(&mut self) -> bool;
}

/// Host channel of a caller that cannot reach the host mid-request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHost;

impl HostChannel for NoHost {
    fn keepalive(&mut self, _status: KeepaliveStatus) {}

    fn cancel_requested(&mut self) -> bool {
        false
    }
}

/// Errors reported by a [`RecordStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum StoreError {
    #[cfg_attr(feature = "std", error("record not found"))]
    NotFound,
    #[cfg_attr(feature = "std", error("no space left in record store"))]
    NoSpace,
    #[cfg_attr(feature = "std", error("record store is busy"))]
    Busy,
    #[cfg_attr(feature = "std", error("record is corrupt"))]
    Corrupt,
    #[cfg_attr(feature = "std", error("record store I/O failure: {0}"))]
    Io(String),
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::NotFound => "record not found",
            Self::NoSpace => "no space left in record store",
            Self::Busy => "record store is busy",
            Self::Corrupt => "record is corrupt",
            Self::Io(msg) => return write!(f, "record store I/O failure: {msg}"),
        };
        f.write_str(msg)
    }
}

impl From<StoreError> for StatusCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoSpace => StatusCode::KeyStoreFull,
            StoreError::NotFound => StatusCode::NoCredentials,
            StoreError::Busy => StatusCode::ChannelBusy,
            StoreError::Corrupt | StoreError::Io(_) => StatusCode::Other,
        }
    }
}

/// Keyed record store addressed by `(file_id, key)`
///
/// Operations may complete asynchronously on flash; the engine polls
/// [`RecordStore::is_busy`] before issuing the next one.
pub trait RecordStore {
    fn find(&mut self, file_id: u16, key: u16) -> Result<Vec<u8>, StoreError>;

    fn write(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError>;

    fn update(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError>;

    fn delete_file(&mut self, file_id: u16) -> Result<(), StoreError>;

    fn garbage_collect(&mut self) -> Result<(), StoreError>;

    fn is_busy(&self) -> bool {
        false
    }

    /// Service pending work while the engine waits on [`RecordStore::is_busy`]
    fn poll(&mut self) {}
}

impl<S: RecordStore + ?Sized> RecordStore for &mut S {
    fn find(&mut self, file_id: u16, key: u16) -> Result<Vec<u8>, StoreError> {
        (**self).find(file_id, key)
    }

    fn write(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError> {
        (**self).write(file_id, key, data)
    }

    fn update(&mut self, file_id: u16, key: u16, data: &[u8]) -> Result<(), StoreError> {
        (**self).update(file_id, key, data)
    }

    fn delete_file(&mut self, file_id: u16) -> Result<(), StoreError> {
        (**self).delete_file(file_id)
    }

    fn garbage_collect(&mut self) -> Result<(), StoreError> {
        (**self).garbage_collect()
    }

    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }

    fn poll(&mut self) {
        (**self).poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_result_mapping() {
        assert_eq!(UpResult::Accepted.into_status(), Ok(()));
        assert_eq!(
            UpResult::Disabled.into_status(),
            Err(StatusCode::Processing)
        );
        assert_eq!(
            UpResult::Canceled.into_status(),
            Err(StatusCode::KeepaliveCancel)
        );
        assert_eq!(
            UpResult::Timeout.into_status(),
            Err(StatusCode::ActionTimeout)
        );
    }

    #[test]
    fn test_store_error_status() {
        assert_eq!(StatusCode::from(StoreError::NoSpace), StatusCode::KeyStoreFull);
        assert_eq!(StatusCode::from(StoreError::Io("disk".into())), StatusCode::Other);
    }
}
