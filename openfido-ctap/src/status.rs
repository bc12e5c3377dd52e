//! CTAP2 status codes
//!
//! Every response produced by [`crate::dispatcher::ctap_request`] starts with
//! one of these bytes. Only `Success` carries a CBOR body.

use core::fmt;

/// CTAP2 status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    InvalidCommand = 0x01,
    InvalidParameter = 0x02,
    InvalidLength = 0x03,
    InvalidSeq = 0x04,
    Timeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0A,
    InvalidChannel = 0x0B,
    CborParsing = 0x10,
    CborUnexpectedType = 0x11,
    InvalidCbor = 0x12,
    InvalidCborType = 0x13,
    MissingParameter = 0x14,
    LimitExceeded = 0x15,
    UnsupportedExtension = 0x16,
    TooManyElements = 0x17,
    ExtensionNotSupported = 0x18,
    CredentialExcluded = 0x19,
    CredentialNotValid = 0x20,
    /// User presence is disabled for this request (`up = false`)
    Processing = 0x21,
    InvalidCredential = 0x22,
    UserActionPending = 0x23,
    OperationPending = 0x24,
    NoOperations = 0x25,
    UnsupportedAlgorithm = 0x26,
    OperationDenied = 0x27,
    KeyStoreFull = 0x28,
    NotBusy = 0x29,
    NoOperationPending = 0x2A,
    UnsupportedOption = 0x2B,
    InvalidOption = 0x2C,
    /// A cancel arrived while waiting for user presence
    KeepaliveCancel = 0x2D,
    NoCredentials = 0x2E,
    UserActionTimeout = 0x2F,
    NotAllowed = 0x30,
    PinInvalid = 0x31,
    /// Remaining PIN retries reached zero; only reset recovers
    PinBlocked = 0x32,
    PinAuthInvalid = 0x33,
    /// Per-boot PIN attempts exhausted; a power cycle recovers
    PinAuthBlocked = 0x34,
    PinNotSet = 0x35,
    PinRequired = 0x36,
    PinPolicyViolation = 0x37,
    PinTokenExpired = 0x38,
    RequestTooLarge = 0x39,
    ActionTimeout = 0x3A,
    UpRequired = 0x3B,
    Other = 0x7F,
    SpecLast = 0xDF,
    ExtensionFirst = 0xE0,
    ExtensionLast = 0xEF,
    VendorFirst = 0xF0,
    VendorLast = 0xFF,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Success => "success",
            Self::InvalidCommand => "invalid command",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidLength => "invalid length",
            Self::InvalidSeq => "invalid sequence",
            Self::Timeout => "timeout",
            Self::ChannelBusy => "channel busy",
            Self::LockRequired => "lock required",
            Self::InvalidChannel => "invalid channel",
            Self::CborParsing => "CBOR parsing error",
            Self::CborUnexpectedType => "CBOR unexpected type",
            Self::InvalidCbor => "invalid CBOR",
            Self::InvalidCborType => "invalid CBOR type",
            Self::MissingParameter => "missing parameter",
            Self::LimitExceeded => "limit exceeded",
            Self::UnsupportedExtension => "unsupported extension",
            Self::TooManyElements => "too many elements",
            Self::ExtensionNotSupported => "extension not supported",
            Self::CredentialExcluded => "credential excluded",
            Self::CredentialNotValid => "credential not valid",
            Self::Processing => "processing",
            Self::InvalidCredential => "invalid credential",
            Self::UserActionPending => "user action pending",
            Self::OperationPending => "operation pending",
            Self::NoOperations => "no operations",
            Self::UnsupportedAlgorithm => "unsupported algorithm",
            Self::OperationDenied => "operation denied",
            Self::KeyStoreFull => "key store full",
            Self::NotBusy => "not busy",
            Self::NoOperationPending => "no operation pending",
            Self::UnsupportedOption => "unsupported option",
            Self::InvalidOption => "invalid option",
            Self::KeepaliveCancel => "keepalive cancel",
            Self::NoCredentials => "no credentials",
            Self::UserActionTimeout => "user action timeout",
            Self::NotAllowed => "not allowed",
            Self::PinInvalid => "PIN invalid",
            Self::PinBlocked => "PIN blocked",
            Self::PinAuthInvalid => "PIN auth invalid",
            Self::PinAuthBlocked => "PIN auth blocked",
            Self::PinNotSet => "PIN not set",
            Self::PinRequired => "PIN required",
            Self::PinPolicyViolation => "PIN policy violation",
            Self::PinTokenExpired => "PIN token expired",
            Self::RequestTooLarge => "request too large",
            Self::ActionTimeout => "action timeout",
            Self::UpRequired => "user presence required",
            Self::Other => "other error",
            Self::SpecLast => "spec last",
            Self::ExtensionFirst => "extension error",
            Self::ExtensionLast => "extension last",
            Self::VendorFirst => "vendor error",
            Self::VendorLast => "vendor last",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StatusCode {}

impl StatusCode {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Decode a status byte; unknown values collapse to `Other`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0x01 => Self::InvalidCommand,
            0x02 => Self::InvalidParameter,
            0x03 => Self::InvalidLength,
            0x04 => Self::InvalidSeq,
            0x05 => Self::Timeout,
            0x06 => Self::ChannelBusy,
            0x0A => Self::LockRequired,
            0x0B => Self::InvalidChannel,
            0x10 => Self::CborParsing,
            0x11 => Self::CborUnexpectedType,
            0x12 => Self::InvalidCbor,
            0x13 => Self::InvalidCborType,
            0x14 => Self::MissingParameter,
            0x15 => Self::LimitExceeded,
            0x16 => Self::UnsupportedExtension,
            0x17 => Self::TooManyElements,
            0x18 => Self::ExtensionNotSupported,
            0x19 => Self::CredentialExcluded,
            0x20 => Self::CredentialNotValid,
            0x21 => Self::Processing,
            0x22 => Self::InvalidCredential,
            0x23 => Self::UserActionPending,
            0x24 => Self::OperationPending,
            0x25 => Self::NoOperations,
            0x26 => Self::UnsupportedAlgorithm,
            0x27 => Self::OperationDenied,
            0x28 => Self::KeyStoreFull,
            0x29 => Self::NotBusy,
            0x2A => Self::NoOperationPending,
            0x2B => Self::UnsupportedOption,
            0x2C => Self::InvalidOption,
            0x2D => Self::KeepaliveCancel,
            0x2E => Self::NoCredentials,
            0x2F => Self::UserActionTimeout,
            0x30 => Self::NotAllowed,
            0x31 => Self::PinInvalid,
            0x32 => Self::PinBlocked,
            0x33 => Self::PinAuthInvalid,
            0x34 => Self::PinAuthBlocked,
            0x35 => Self::PinNotSet,
            0x36 => Self::PinRequired,
            0x37 => Self::PinPolicyViolation,
            0x38 => Self::PinTokenExpired,
            0x39 => Self::RequestTooLarge,
            0x3A => Self::ActionTimeout,
            0x3B => Self::UpRequired,
            0xDF => Self::SpecLast,
            0xE0 => Self::ExtensionFirst,
            0xEF => Self::ExtensionLast,
            0xF0 => Self::VendorFirst,
            0xFF => Self::VendorLast,
            _ => Self::Other,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.to_u8()
    }
}

impl From<openfido_crypto::CryptoError> for StatusCode {
    fn from(err: openfido_crypto::CryptoError) -> Self {
        use openfido_crypto::CryptoError;
        match err {
            CryptoError::InvalidPublicKey
            | CryptoError::InvalidCoseKey
            | CryptoError::InvalidKeyLength { .. } => Self::InvalidParameter,
            CryptoError::InvalidPrivateKey
            | CryptoError::InvalidSignature
            | CryptoError::DecryptionFailed
            | CryptoError::EncryptionFailed
            | CryptoError::KeyAgreementFailed
            | CryptoError::KeyDerivationFailed => Self::Other,
        }
    }
}

/// Result type for CTAP operations
pub type Result<T> = core::result::Result<T, StatusCode>;
