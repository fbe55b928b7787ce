//! Message framing for both wire variants, plus a length-prefixed stream codec.
//!
//! A framed message is what a transport carries as one unit and what the
//! session MTU is measured against. Byte-stream transports additionally wrap
//! each framed message as `[u32 big-endian length][frame]`.

use std::io::{self, Read, Write};
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::message::{Header, Op};

/// Maximum allowed stream frame (16 MiB).
const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// Size of the fixed binary header used by [`ProtocolVariant::Nmp`].
pub const NMP_HDR_LEN: usize = 8;

/// Errors produced while framing or unframing a message.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The body could not be serialized.
    #[error("encode: {0}")]
    Encode(#[source] postcard::Error),

    /// The body could not be deserialized.
    #[error("decode: {0}")]
    Decode(#[source] postcard::Error),

    /// The frame is shorter than its header announces.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes announced by the header.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The body does not fit the 16-bit header length field.
    #[error("message body of {0} bytes exceeds the header length field")]
    BodyTooLarge(usize),

    /// The header carries an unknown opcode.
    #[error("unknown opcode {0}")]
    BadOp(u8),
}

/// Wire encoding selected by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProtocolVariant {
    /// Fixed 8-byte big-endian header followed by a postcard body.
    #[default]
    Nmp,
    /// Header and body postcard-encoded together.
    Omp,
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Nmp => "nmp",
            Self::Omp => "omp",
        })
    }
}

impl FromStr for ProtocolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nmp" => Ok(Self::Nmp),
            "omp" => Ok(Self::Omp),
            _ => Err(format!("unknown protocol variant: {s}")),
        }
    }
}

/// Frames `body` under `hdr` using `variant`.
///
/// The `len` field of `hdr` is ignored; NMP framing fills it in from the body.
pub fn frame(
    variant: ProtocolVariant,
    hdr: &Header,
    body: &impl Serialize,
) -> Result<Vec<u8>, CodecError> {
    match variant {
        ProtocolVariant::Nmp => {
            let payload = postcard::to_allocvec(body).map_err(CodecError::Encode)?;
            let len = u16::try_from(payload.len())
                .map_err(|_| CodecError::BodyTooLarge(payload.len()))?;
            let mut out = Vec::with_capacity(NMP_HDR_LEN + payload.len());
            out.push(hdr.op as u8);
            out.push(hdr.flags);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&hdr.group.to_be_bytes());
            out.push(hdr.seq);
            out.push(hdr.id);
            out.extend_from_slice(&payload);
            Ok(out)
        }
        ProtocolVariant::Omp => {
            let hdr = Header { len: 0, ..*hdr };
            postcard::to_allocvec(&(hdr, body)).map_err(CodecError::Encode)
        }
    }
}

/// Parses a framed message produced by [`frame`].
pub fn unframe<T: DeserializeOwned>(
    variant: ProtocolVariant,
    buf: &[u8],
) -> Result<(Header, T), CodecError> {
    match variant {
        ProtocolVariant::Nmp => {
            let (raw, payload) = buf.split_first_chunk::<NMP_HDR_LEN>().ok_or(
                CodecError::Truncated {
                    expected: NMP_HDR_LEN,
                    actual: buf.len(),
                },
            )?;
            let op = Op::from_u8(raw[0]).ok_or(CodecError::BadOp(raw[0]))?;
            let len = u16::from_be_bytes([raw[2], raw[3]]);
            let hdr = Header {
                op,
                flags: raw[1],
                len,
                group: u16::from_be_bytes([raw[4], raw[5]]),
                seq: raw[6],
                id: raw[7],
            };
            let body = payload
                .get(..usize::from(len))
                .ok_or(CodecError::Truncated {
                    expected: NMP_HDR_LEN + usize::from(len),
                    actual: buf.len(),
                })?;
            let body = postcard::from_bytes(body).map_err(CodecError::Decode)?;
            Ok((hdr, body))
        }
        ProtocolVariant::Omp => postcard::from_bytes(buf).map_err(CodecError::Decode),
    }
}

/// Writes `frame` to `w` behind a 4-byte big-endian length prefix.
pub fn write_frame<W: Write>(w: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = u32::try_from(frame.len())
        .ok()
        .filter(|&n| n <= MAX_FRAME)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "frame exceeds 16 MiB limit"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(frame)?;
    w.flush()
}

/// Reads one length-prefixed frame from `r`.
pub fn read_frame(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    let len = u32::from_be_bytes(buf);
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds 16 MiB limit",
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Removes one complete length-prefixed frame from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
/// incomplete, so a reader can resume after a timeout without losing bytes.
pub fn take_frame(buf: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    let Some(prefix) = buf.first_chunk::<4>() else {
        return Ok(None);
    };
    let len = u32::from_be_bytes(*prefix);
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds 16 MiB limit",
        ));
    }
    let end = 4 + len as usize;
    if buf.len() < end {
        return Ok(None);
    }
    let frame = buf[4..end].to_vec();
    buf.drain(..end);
    Ok(Some(frame))
}
