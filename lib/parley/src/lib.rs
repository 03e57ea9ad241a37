//! Framed wire protocol spoken between chat clients and the relay server.

pub mod frame;
pub mod shared;
pub mod wire;

/// Exclusive upper bound on username storage. Names carry 1 to 31 bytes.
pub const MAX_USERNAME_LEN: usize = 32;
/// Largest plaintext a client is expected to encrypt in one message.
pub const MAX_MESSAGE_LEN: usize = 1024;
/// Largest frame payload accepted off the wire.
pub const MAX_PAYLOAD_LEN: usize = MAX_MESSAGE_LEN * 2;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const CHALLENGE_LEN: usize = 32;
