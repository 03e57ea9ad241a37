//! Length-prefixed framing over a byte stream. Every frame is
//! `length(u32 BE) | type(u8) | payload[length]` where `length` counts the
//! payload bytes only.

use crate::shared::{WireError, WireResult};
use crate::MAX_PAYLOAD_LEN;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::{Read, Write};
use veil::crypto::{self, SecretBytes};

pub const HEADER_SIZE: usize = 5;

/// A frame as received off the wire, before the payload is interpreted.
/// The payload buffer is scrubbed when the frame is dropped.
#[derive(Debug)]
pub struct RawFrame {
    pub kind: u8,
    pub payload: SecretBytes,
}

/// Reads exactly one frame. An EOF on the first header byte reports a clean
/// disconnect; an EOF anywhere else reports a truncated stream.
pub fn read_frame<R: Read>(stream: &mut R) -> WireResult<RawFrame> {
    let mut header = [0u8; HEADER_SIZE];
    read_header(stream, &mut header)?;

    let length = BigEndian::read_u32(&header[..4]);
    let kind = header[4];

    if length as usize > MAX_PAYLOAD_LEN {
        return Err(WireError::Oversized(length));
    }

    let mut payload = vec![0u8; length as usize];
    stream.read_exact(&mut payload)?;

    Ok(RawFrame {
        kind,
        payload: SecretBytes::new(payload),
    })
}

fn read_header<R: Read>(stream: &mut R, buf: &mut [u8]) -> WireResult<()> {
    let mut filled = 0;

    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(WireError::Closed),
            Ok(0) => return Err(WireError::Truncated),
            Ok(count) => filled += count,
            Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

/// Writes one frame as a single contiguous write. The staging buffer is
/// scrubbed before release since payloads may carry ciphertext or key
/// material.
pub fn write_frame<W: Write>(stream: &mut W, kind: u8, payload: &[u8]) -> WireResult<()> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.write_u32::<BigEndian>(payload.len() as u32)?;
    buf.write_u8(kind)?;
    buf.extend_from_slice(payload);

    let result = stream.write_all(&buf).map_err(Into::into);
    crypto::memzero(&mut buf);

    result
}
