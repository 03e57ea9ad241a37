//! Typed request and response messages layered over the raw framing.

use crate::shared::{Disposition, ErrorCode, Status, WireError, WireResult};
use crate::wire::{self, RawFrame};
use crate::{CHALLENGE_LEN, MAX_USERNAME_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::{Read, Write};
use veil::crypto::{self, SecretBytes};

/// Frame type identifiers. Requests sit below 0x80, responses above.
pub mod kind {
    pub const REGISTER_USER: u8 = 0x01;
    pub const LOGIN_USER: u8 = 0x02;
    pub const GET_PUBLIC_KEY: u8 = 0x03;
    pub const SEND_MESSAGE: u8 = 0x04;
    pub const GET_MESSAGES: u8 = 0x05;
    pub const SET_STATUS: u8 = 0x06;
    pub const LIST_USERS: u8 = 0x07;
    pub const LOGOUT: u8 = 0x08;

    pub const REGISTER_RESPONSE: u8 = 0x81;
    pub const LOGIN_RESPONSE: u8 = 0x82;
    pub const PUBLIC_KEY_RESPONSE: u8 = 0x83;
    pub const MESSAGE_ACK: u8 = 0x84;
    pub const INCOMING_MESSAGE: u8 = 0x85;
    pub const USER_LIST_RESPONSE: u8 = 0x86;
    pub const STATUS_UPDATE: u8 = 0x87;
    pub const ERROR: u8 = 0x88;
    pub const CHALLENGE: u8 = 0x89;
}

/// Client-to-server messages.
#[derive(Debug, Eq, PartialEq)]
pub enum Request {
    Register {
        username: String,
        public_key: [u8; PUBLIC_KEY_LEN],
    },
    Login {
        username: String,
        signature: [u8; SIGNATURE_LEN],
    },
    GetPublicKey {
        username: String,
    },
    Send {
        recipient: String,
        ciphertext: SecretBytes,
    },
    GetMessages,
    SetStatus(Status),
    ListUsers,
    Logout,
}

/// Server-to-client messages.
#[derive(Debug, Eq, PartialEq)]
pub enum Response {
    Register {
        error: Option<ErrorCode>,
    },
    Login {
        challenge: Option<[u8; CHALLENGE_LEN]>,
    },
    PublicKey {
        key: Option<[u8; PUBLIC_KEY_LEN]>,
    },
    Ack {
        message_id: u32,
        disposition: Disposition,
    },
    Incoming {
        message_id: u32,
        sender: String,
        timestamp: u32,
        ciphertext: SecretBytes,
    },
    UserList {
        users: Vec<(String, Status)>,
    },
    StatusUpdate {
        username: String,
        status: Status,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Challenge {
        challenge: [u8; CHALLENGE_LEN],
    },
}

impl Request {
    /// Reads one frame off the stream and interprets it as a request.
    pub fn read_from<R: Read>(stream: &mut R) -> WireResult<Request> {
        let frame = wire::read_frame(stream)?;
        Request::parse(&frame)
    }

    /// Interprets a raw frame as a request. Trailing payload bytes beyond
    /// the declared fields are tolerated.
    pub fn parse(frame: &RawFrame) -> WireResult<Request> {
        let mut reader = PayloadReader::new(&frame.payload);

        match frame.kind {
            kind::REGISTER_USER => {
                let username = reader.name()?;
                let mut public_key = [0u8; PUBLIC_KEY_LEN];
                public_key.copy_from_slice(reader.bytes(PUBLIC_KEY_LEN)?);
                Ok(Request::Register { username, public_key })
            }
            kind::LOGIN_USER => {
                let username = reader.name()?;
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(reader.bytes(SIGNATURE_LEN)?);
                Ok(Request::Login { username, signature })
            }
            kind::GET_PUBLIC_KEY => Ok(Request::GetPublicKey {
                username: reader.name()?,
            }),
            kind::SEND_MESSAGE => {
                let recipient = reader.name()?;
                let length = reader.u16()? as usize;
                if length == 0 {
                    return Err(WireError::Malformed("empty message"));
                }
                let ciphertext = SecretBytes::new(reader.bytes(length)?.to_vec());
                Ok(Request::Send { recipient, ciphertext })
            }
            kind::GET_MESSAGES => Ok(Request::GetMessages),
            kind::SET_STATUS => {
                let status = Status::from_u8(reader.u8()?)
                    .ok_or(WireError::Malformed("invalid status value"))?;
                Ok(Request::SetStatus(status))
            }
            kind::LIST_USERS => Ok(Request::ListUsers),
            kind::LOGOUT => Ok(Request::Logout),
            other => Err(WireError::UnknownType(other)),
        }
    }

    /// Encodes the request as one frame on the stream.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> WireResult<()> {
        let mut payload = Vec::new();

        let kind = match self {
            Request::Register { username, public_key } => {
                write_name(&mut payload, username)?;
                payload.extend_from_slice(public_key);
                kind::REGISTER_USER
            }
            Request::Login { username, signature } => {
                write_name(&mut payload, username)?;
                payload.extend_from_slice(signature);
                kind::LOGIN_USER
            }
            Request::GetPublicKey { username } => {
                write_name(&mut payload, username)?;
                kind::GET_PUBLIC_KEY
            }
            Request::Send { recipient, ciphertext } => {
                write_name(&mut payload, recipient)?;
                payload.write_u16::<BigEndian>(ciphertext.len() as u16)?;
                payload.extend_from_slice(ciphertext);
                kind::SEND_MESSAGE
            }
            Request::GetMessages => kind::GET_MESSAGES,
            Request::SetStatus(status) => {
                payload.push((*status).into());
                kind::SET_STATUS
            }
            Request::ListUsers => kind::LIST_USERS,
            Request::Logout => kind::LOGOUT,
        };

        let result = wire::write_frame(stream, kind, &payload);
        crypto::memzero(&mut payload);

        result
    }
}

impl Response {
    /// Reads one frame off the stream and interprets it as a response.
    pub fn read_from<R: Read>(stream: &mut R) -> WireResult<Response> {
        let frame = wire::read_frame(stream)?;
        Response::parse(&frame)
    }

    /// Interprets a raw frame as a response.
    pub fn parse(frame: &RawFrame) -> WireResult<Response> {
        let mut reader = PayloadReader::new(&frame.payload);

        match frame.kind {
            kind::REGISTER_RESPONSE => {
                let ok = reader.u8()?;
                let code = reader.u8()?;
                let error = if ok == 1 {
                    None
                } else {
                    Some(
                        ErrorCode::from_u8(code)
                            .ok_or(WireError::Malformed("unknown error code"))?,
                    )
                };
                Ok(Response::Register { error })
            }
            kind::LOGIN_RESPONSE => {
                let challenge = if reader.u8()? == 1 {
                    let mut challenge = [0u8; CHALLENGE_LEN];
                    challenge.copy_from_slice(reader.bytes(CHALLENGE_LEN)?);
                    Some(challenge)
                } else {
                    None
                };
                Ok(Response::Login { challenge })
            }
            kind::PUBLIC_KEY_RESPONSE => {
                let key = if reader.u8()? == 1 {
                    let mut key = [0u8; PUBLIC_KEY_LEN];
                    key.copy_from_slice(reader.bytes(PUBLIC_KEY_LEN)?);
                    Some(key)
                } else {
                    None
                };
                Ok(Response::PublicKey { key })
            }
            kind::MESSAGE_ACK => {
                let message_id = reader.u32()?;
                let disposition = Disposition::from_u8(reader.u8()?)
                    .ok_or(WireError::Malformed("invalid disposition"))?;
                Ok(Response::Ack { message_id, disposition })
            }
            kind::INCOMING_MESSAGE => {
                let message_id = reader.u32()?;
                let sender = reader.name()?;
                let timestamp = reader.u32()?;
                let length = reader.u16()? as usize;
                let ciphertext = SecretBytes::new(reader.bytes(length)?.to_vec());
                Ok(Response::Incoming {
                    message_id,
                    sender,
                    timestamp,
                    ciphertext,
                })
            }
            kind::USER_LIST_RESPONSE => {
                let count = reader.u16()? as usize;
                let mut users = Vec::with_capacity(count);
                for _ in 0..count {
                    let username = reader.name()?;
                    let status = Status::from_u8(reader.u8()?)
                        .ok_or(WireError::Malformed("invalid status value"))?;
                    users.push((username, status));
                }
                Ok(Response::UserList { users })
            }
            kind::STATUS_UPDATE => {
                let username = reader.name()?;
                let status = Status::from_u8(reader.u8()?)
                    .ok_or(WireError::Malformed("invalid status value"))?;
                Ok(Response::StatusUpdate { username, status })
            }
            kind::ERROR => {
                let code = ErrorCode::from_u8(reader.u8()?)
                    .ok_or(WireError::Malformed("unknown error code"))?;
                let length = reader.u16()? as usize;
                let message = String::from_utf8(reader.bytes(length)?.to_vec())
                    .map_err(|_| WireError::Malformed("error text not utf-8"))?;
                Ok(Response::Error { code, message })
            }
            kind::CHALLENGE => {
                let mut challenge = [0u8; CHALLENGE_LEN];
                challenge.copy_from_slice(reader.bytes(CHALLENGE_LEN)?);
                Ok(Response::Challenge { challenge })
            }
            other => Err(WireError::UnknownType(other)),
        }
    }

    /// Encodes the response as one frame on the stream.
    pub fn write_to<W: Write>(&self, stream: &mut W) -> WireResult<()> {
        let mut payload = Vec::new();

        let kind = match self {
            Response::Register { error } => {
                match error {
                    None => payload.extend_from_slice(&[1, 0]),
                    Some(code) => payload.extend_from_slice(&[0, (*code).into()]),
                }
                kind::REGISTER_RESPONSE
            }
            Response::Login { challenge } => {
                match challenge {
                    Some(challenge) => {
                        payload.push(1);
                        payload.extend_from_slice(challenge);
                    }
                    None => payload.push(0),
                }
                kind::LOGIN_RESPONSE
            }
            Response::PublicKey { key } => {
                match key {
                    Some(key) => {
                        payload.push(1);
                        payload.extend_from_slice(key);
                    }
                    None => payload.push(0),
                }
                kind::PUBLIC_KEY_RESPONSE
            }
            Response::Ack { message_id, disposition } => {
                payload.write_u32::<BigEndian>(*message_id)?;
                payload.push((*disposition).into());
                kind::MESSAGE_ACK
            }
            Response::Incoming {
                message_id,
                sender,
                timestamp,
                ciphertext,
            } => {
                payload.write_u32::<BigEndian>(*message_id)?;
                write_name(&mut payload, sender)?;
                payload.write_u32::<BigEndian>(*timestamp)?;
                payload.write_u16::<BigEndian>(ciphertext.len() as u16)?;
                payload.extend_from_slice(ciphertext);
                kind::INCOMING_MESSAGE
            }
            Response::UserList { users } => {
                payload.write_u16::<BigEndian>(users.len() as u16)?;
                for (username, status) in users {
                    write_name(&mut payload, username)?;
                    payload.push((*status).into());
                }
                kind::USER_LIST_RESPONSE
            }
            Response::StatusUpdate { username, status } => {
                write_name(&mut payload, username)?;
                payload.push((*status).into());
                kind::STATUS_UPDATE
            }
            Response::Error { code, message } => {
                payload.push((*code).into());
                payload.write_u16::<BigEndian>(message.len() as u16)?;
                payload.extend_from_slice(message.as_bytes());
                kind::ERROR
            }
            Response::Challenge { challenge } => {
                payload.extend_from_slice(challenge);
                kind::CHALLENGE
            }
        };

        let result = wire::write_frame(stream, kind, &payload);
        crypto::memzero(&mut payload);

        result
    }
}

/// Bounds-checked reader over a frame payload. Exhausting the payload mid
/// field reports a malformed frame rather than a stream error.
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> PayloadReader<'a> {
        PayloadReader { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> WireResult<&'a [u8]> {
        if self.data.len() - self.pos < len {
            return Err(WireError::Malformed("payload too short"));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> WireResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> WireResult<u16> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    fn u32(&mut self) -> WireResult<u32> {
        Ok(BigEndian::read_u32(self.bytes(4)?))
    }

    /// A length-prefixed username of 1 to 31 bytes. Charset validation is
    /// left to the registry; the bytes only need to be valid UTF-8 here.
    fn name(&mut self) -> WireResult<String> {
        let len = self.u8()? as usize;
        if len == 0 || len >= MAX_USERNAME_LEN {
            return Err(WireError::Malformed("bad name length"));
        }
        String::from_utf8(self.bytes(len)?.to_vec())
            .map_err(|_| WireError::Malformed("name not utf-8"))
    }
}

fn write_name(payload: &mut Vec<u8>, name: &str) -> WireResult<()> {
    if name.is_empty() || name.len() >= MAX_USERNAME_LEN {
        return Err(WireError::Malformed("bad name length"));
    }
    payload.push(name.len() as u8);
    payload.extend_from_slice(name.as_bytes());
    Ok(())
}
