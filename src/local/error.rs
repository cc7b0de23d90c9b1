use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum LocalError {
    Io(std::io::Error),
    /// No matching response arrived within the allotted time.
    Timeout(Duration),
    ConnectionClosed,
    /// The device did not answer the hello for any attempted protocol version.
    Handshake(String),
    Decode(DecodeError),
    Encrypt,
    Json(serde_json::Error),
    /// The device answered the request with an error.
    Device(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    FrameTooShort,
    PayloadLengthMismatch,
    PayloadCrcMissing,
    CrcMismatch,
    UnknownVersion,
    UnknownProtocol(u16),
    MissingAckNonce,
    Decrypt,
    BadPadding,
    MissingDps,
    MissingResponse,
}

impl fmt::Display for LocalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalError::Io(e) => write!(f, "io error: {}", e),
            LocalError::Timeout(d) => write!(f, "timed out after {}s waiting for the device", d.as_secs_f32()),
            LocalError::ConnectionClosed => write!(f, "connection closed by the device"),
            LocalError::Handshake(s) => write!(f, "handshake failed: {}", s),
            LocalError::Decode(e) => write!(f, "decode error: {}", e),
            LocalError::Encrypt => write!(f, "payload encryption failed"),
            LocalError::Json(e) => write!(f, "json error: {}", e),
            LocalError::Device(s) => write!(f, "device error: {}", s),
        }
    }
}

impl std::error::Error for LocalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocalError::Io(e) => Some(e),
            LocalError::Decode(e) => Some(e),
            LocalError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::FrameTooShort => write!(f, "frame too short"),
            DecodeError::PayloadLengthMismatch => write!(f, "payload length mismatch"),
            DecodeError::PayloadCrcMissing => write!(f, "payload crc missing"),
            DecodeError::CrcMismatch => write!(f, "crc mismatch"),
            DecodeError::UnknownVersion => write!(f, "unknown protocol version"),
            DecodeError::UnknownProtocol(p) => write!(f, "unknown message protocol {}", p),
            DecodeError::MissingAckNonce => write!(f, "missing ack nonce"),
            DecodeError::Decrypt => write!(f, "payload decryption failed"),
            DecodeError::BadPadding => write!(f, "invalid padding"),
            DecodeError::MissingDps => write!(f, "missing dps"),
            DecodeError::MissingResponse => write!(f, "missing response data point"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for LocalError {
    fn from(value: DecodeError) -> Self {
        LocalError::Decode(value)
    }
}

impl From<std::io::Error> for LocalError {
    fn from(value: std::io::Error) -> Self {
        LocalError::Io(value)
    }
}

impl From<serde_json::Error> for LocalError {
    fn from(value: serde_json::Error) -> Self {
        LocalError::Json(value)
    }
}
