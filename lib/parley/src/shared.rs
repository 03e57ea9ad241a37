use crate::MAX_USERNAME_LEN;
use std::io;

/// Presence state of a registered user.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Offline = 0,
    Online = 1,
    Away = 2,
}

impl Status {
    #[inline]
    pub fn from_u8(raw: u8) -> Option<Status> {
        match raw {
            0 => Some(Status::Offline),
            1 => Some(Status::Online),
            2 => Some(Status::Away),
            _ => None,
        }
    }
}

impl From<Status> for u8 {
    #[inline]
    fn from(status: Status) -> Self {
        status as u8
    }
}

/// Outcome byte carried in a message acknowledgement.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Disposition {
    Failed = 0,
    Delivered = 1,
    Queued = 2,
}

impl Disposition {
    #[inline]
    pub fn from_u8(raw: u8) -> Option<Disposition> {
        match raw {
            0 => Some(Disposition::Failed),
            1 => Some(Disposition::Delivered),
            2 => Some(Disposition::Queued),
            _ => None,
        }
    }
}

impl From<Disposition> for u8 {
    #[inline]
    fn from(disposition: Disposition) -> Self {
        disposition as u8
    }
}

/// Error codes carried in ERROR frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorCode {
    InvalidUsername = 0x01,
    UserExists = 0x02,
    UserNotFound = 0x03,
    AuthFailed = 0x04,
    InvalidFormat = 0x05,
    RateLimit = 0x06,
    ServerError = 0x07,
    ConnectionTerminated = 0x08,
}

impl ErrorCode {
    #[inline]
    pub fn from_u8(raw: u8) -> Option<ErrorCode> {
        match raw {
            0x01 => Some(ErrorCode::InvalidUsername),
            0x02 => Some(ErrorCode::UserExists),
            0x03 => Some(ErrorCode::UserNotFound),
            0x04 => Some(ErrorCode::AuthFailed),
            0x05 => Some(ErrorCode::InvalidFormat),
            0x06 => Some(ErrorCode::RateLimit),
            0x07 => Some(ErrorCode::ServerError),
            0x08 => Some(ErrorCode::ConnectionTerminated),
            _ => None,
        }
    }
}

impl From<ErrorCode> for u8 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code as u8
    }
}

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Eq, PartialEq)]
pub enum WireError {
    /// Peer closed the connection between frames.
    Closed,
    /// Stream ended inside a frame.
    Truncated,
    /// Declared payload length exceeds the accepted maximum.
    Oversized(u32),
    /// Payload bytes do not form a valid message of the declared type.
    Malformed(&'static str),
    /// Unrecognized frame type byte.
    UnknownType(u8),
    Io(io::ErrorKind),
}

impl From<io::Error> for WireError {
    #[inline]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => WireError::Truncated,
            kind => WireError::Io(kind),
        }
    }
}

/// Usernames are 1 to 31 bytes of `[A-Za-z0-9_]`, compared case-sensitively.
#[inline]
pub fn valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() < MAX_USERNAME_LEN
        && name
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}
