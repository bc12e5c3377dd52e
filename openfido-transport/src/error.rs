//! Framing errors shared by every transport

use crate::ctaphid::ErrorCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a frame or message was rejected
///
/// Framing errors never reach the authenticator engine. The transport answers
/// with a single `ERROR` frame carrying [`Error::to_error_code`] and drops
/// whatever it was reassembling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid packet format")]
    InvalidPacket,

    #[error("unknown channel")]
    InvalidChannel,

    #[error("invalid command")]
    InvalidCommand,

    #[error("invalid sequence number")]
    InvalidSequence,

    #[error("invalid message length")]
    InvalidLength,

    #[error("message too large")]
    MessageTooLarge,

    #[error("timed out waiting for continuation")]
    Timeout,

    #[error("channel busy")]
    ChannelBusy,

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// One-byte code placed in an `ERROR` frame
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            Error::InvalidCommand => ErrorCode::InvalidCmd,
            Error::InvalidPacket => ErrorCode::InvalidPar,
            Error::InvalidLength | Error::MessageTooLarge => ErrorCode::InvalidLen,
            Error::InvalidSequence => ErrorCode::InvalidSeq,
            Error::Timeout => ErrorCode::MsgTimeout,
            Error::InvalidChannel | Error::ChannelBusy => ErrorCode::ChannelBusy,
            Error::IoError(_) | Error::Other(_) => ErrorCode::Other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidSequence.to_error_code().to_u8(), 0x04);
        assert_eq!(Error::InvalidCommand.to_error_code().to_u8(), 0x01);
        assert_eq!(Error::MessageTooLarge.to_error_code().to_u8(), 0x03);
        assert_eq!(Error::Timeout.to_error_code().to_u8(), 0x05);
        assert_eq!(Error::InvalidChannel.to_error_code().to_u8(), 0x06);
        assert_eq!(Error::IoError("gone".into()).to_error_code().to_u8(), 0x7F);
    }
}
