#![forbid(unsafe_code)]

//! Client for a remote block device served over TCP or WebSocket.
//!
//! An emulator treats the remote volume as a virtual hard disk: fixed-size
//! sector reads and writes by index. This crate hides the network round-trip
//! behind a read-ahead block cache:
//!
//! - [`Drive`]: blocking engine: cache lookup, block fetch with LZ4-framed
//!   payloads, write-through writes
//! - [`AsyncDrive`]: the same engine over tokio streams or a WebSocket
//! - [`BlockCache`]: fixed-capacity LRU of decompressed blocks keyed by
//!   block origin, sized by a memory budget
//! - [`handle`]: the C-shaped opaque-handle facade emulator ports bind to
//!
//! The wire encoding lives in the `sockdisk-protocol` crate.

mod aio;
mod cache;
mod codec;
mod drive;
mod error;
pub mod handle;
mod transport;

#[cfg(not(target_arch = "wasm32"))]
pub use aio::{AsyncDrive, AsyncStreamTransport, AsyncTransport, HandshakeInfo, WsTransport};
pub use cache::{BlockCache, BlockCacheStats};
pub use codec::{CodecError, Lz4BlockCodec, COMPRESSED_SCRATCH};
pub use drive::{
    Drive, DriveConfig, DriveGeometry, DriveStats, DEFAULT_AHEAD_RANGE, DEFAULT_MEMORY_LIMIT,
    DEFAULT_SECTOR_SIZE, DRIVE_GEOMETRY,
};
pub use error::{DriveError, Result, WireStage};
pub use transport::{MemStream, StreamTransport, TcpTransport, Transport, TransportError};
