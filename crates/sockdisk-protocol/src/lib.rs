#![forbid(unsafe_code)]

//! Wire codec for the sockdisk remote block device protocol.
//!
//! This crate is the canonical encoding of the client/server framing used by
//! the sockdisk drive engine. It contains no I/O: the client crate and the
//! test servers both build on these encoders and decoders.
//!
//! All integer fields are little-endian.
//!
//! READ request (6 bytes):
//!
//! ```text
//! 0               1               5
//! +---------------+---------------+---------------+
//! | cmd = 1 (u8)  | origin (u32)  | ahead (u8)    |
//! +---------------+---------------+---------------+
//! ```
//!
//! `origin` is the first sector of the requested block and must be aligned to
//! `ahead` (`origin % ahead == 0`). The response is a `u32` length prefix
//! followed by that many payload bytes; the payload is an LZ4 block that
//! decodes to exactly `ahead * sector_size` bytes, or the raw block itself
//! when the prefix equals `ahead * sector_size`.
//!
//! WRITE request (5 + sector_size bytes), no response:
//!
//! ```text
//! 0               1               5
//! +---------------+---------------+----------------------+
//! | cmd = 2 (u8)  | sector (u32)  | payload (sector_size)|
//! +---------------+---------------+----------------------+
//! ```

use core::fmt;

/// READ command byte.
pub const CMD_READ: u8 = 1;
/// WRITE command byte.
pub const CMD_WRITE: u8 = 2;

/// Size of an encoded READ request.
pub const READ_REQUEST_LEN: usize = 6;
/// Size of a WRITE request header (command byte + sector index).
pub const WRITE_HEADER_LEN: usize = 5;
/// Size of the READ response length prefix.
pub const LEN_PREFIX_LEN: usize = 4;

/// Largest ahead range the wire can express (one byte per request).
pub const MAX_AHEAD_RANGE: u8 = u8::MAX;

/// Upper bound on a READ response payload. Sized for the worst case block
/// (255 sectors of 512 bytes) with headroom; servers must never exceed it.
pub const MAX_PAYLOAD_LEN: usize = 128 * 1024;

/// Default TCP port of the native drive service.
pub const DEFAULT_TCP_PORT: u16 = 8001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub origin: u32,
    pub ahead_range: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest<'a> {
    pub sector: u32,
    pub payload: &'a [u8],
}

/// A decoded client request, as seen by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    Read(ReadRequest),
    Write(WriteRequest<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ZeroAheadRange,
    UnalignedOrigin {
        origin: u32,
        ahead_range: u8,
    },
    RequestTooShort {
        len: usize,
    },
    ReadRequestWrongLen {
        len: usize,
    },
    WriteRequestWrongLen {
        len: usize,
        expected: usize,
    },
    UnknownCommand {
        command: u8,
    },
    PayloadTooLarge {
        len: usize,
        max: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ZeroAheadRange => write!(f, "ahead range must be at least 1"),
            Error::UnalignedOrigin {
                origin,
                ahead_range,
            } => write!(
                f,
                "origin {origin} is not aligned to ahead range {ahead_range}"
            ),
            Error::RequestTooShort { len } => {
                write!(f, "request too short: {len} bytes (missing command byte)")
            }
            Error::ReadRequestWrongLen { len } => write!(
                f,
                "read request must be exactly {READ_REQUEST_LEN} bytes, got {len}"
            ),
            Error::WriteRequestWrongLen { len, expected } => {
                write!(f, "write request must be exactly {expected} bytes, got {len}")
            }
            Error::UnknownCommand { command } => write!(f, "unknown command byte {command}"),
            Error::PayloadTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds the {max} byte bound")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Encode a READ request for a block of `ahead_range` sectors at `origin`.
///
/// `origin` must already be block-aligned; the drive engine derives it with
/// `sector - sector % ahead_range` before calling this.
pub fn encode_read_request(origin: u32, ahead_range: u8) -> Result<[u8; READ_REQUEST_LEN], Error> {
    if ahead_range == 0 {
        return Err(Error::ZeroAheadRange);
    }
    if origin % u32::from(ahead_range) != 0 {
        return Err(Error::UnalignedOrigin {
            origin,
            ahead_range,
        });
    }
    let o = origin.to_le_bytes();
    Ok([CMD_READ, o[0], o[1], o[2], o[3], ahead_range])
}

/// Encode a WRITE request carrying one sector payload.
pub fn encode_write_request(sector: u32, payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let mut out = Vec::with_capacity(WRITE_HEADER_LEN + payload.len());
    out.push(CMD_WRITE);
    out.extend_from_slice(&sector.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode a READ response length prefix.
pub fn encode_len_prefix(len: u32) -> [u8; LEN_PREFIX_LEN] {
    len.to_le_bytes()
}

/// Reassemble a READ response length prefix.
pub fn read_len_prefix(bytes: [u8; LEN_PREFIX_LEN]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Decode one complete client request.
///
/// `sector_size` is the connection's configured sector size; a WRITE request
/// is exactly `WRITE_HEADER_LEN + sector_size` bytes.
pub fn decode_request(bytes: &[u8], sector_size: usize) -> Result<Request<'_>, Error> {
    let (&command, rest) = bytes
        .split_first()
        .ok_or(Error::RequestTooShort { len: bytes.len() })?;
    match command {
        CMD_READ => {
            if bytes.len() != READ_REQUEST_LEN {
                return Err(Error::ReadRequestWrongLen { len: bytes.len() });
            }
            let origin = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let ahead_range = rest[4];
            if ahead_range == 0 {
                return Err(Error::ZeroAheadRange);
            }
            if origin % u32::from(ahead_range) != 0 {
                return Err(Error::UnalignedOrigin {
                    origin,
                    ahead_range,
                });
            }
            Ok(Request::Read(ReadRequest {
                origin,
                ahead_range,
            }))
        }
        CMD_WRITE => {
            let expected = WRITE_HEADER_LEN + sector_size;
            if bytes.len() != expected {
                return Err(Error::WriteRequestWrongLen {
                    len: bytes.len(),
                    expected,
                });
            }
            let sector = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            Ok(Request::Write(WriteRequest {
                sector,
                payload: &rest[4..],
            }))
        }
        command => Err(Error::UnknownCommand { command }),
    }
}
