use crate::cache::{BlockCache, BlockCacheStats};
use crate::codec::Lz4BlockCodec;
use crate::error::{DriveError, Result, WireStage};
use crate::transport::{StreamTransport, TcpTransport, Transport};
use sockdisk_protocol::{
    read_len_prefix, CMD_READ, CMD_WRITE, DEFAULT_TCP_PORT, LEN_PREFIX_LEN, WRITE_HEADER_LEN,
};
use std::net::TcpStream;

pub const DEFAULT_SECTOR_SIZE: usize = 512;
pub const DEFAULT_AHEAD_RANGE: u8 = 255;
pub const DEFAULT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Disk geometry reported to the emulator. These are the fixed values the
/// service advertises for every volume; they are trivia, not derived state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriveGeometry {
    pub size: u32,
    pub heads: u32,
    pub sectors: u32,
    pub cylinders: u32,
    pub sector_size: u32,
}

pub const DRIVE_GEOMETRY: DriveGeometry = DriveGeometry {
    size: 2_097_152,
    heads: 128,
    sectors: 63,
    cylinders: 520,
    sector_size: 512,
};

#[derive(Clone, Copy, Debug)]
pub struct DriveConfig {
    pub sector_size: usize,
    /// Sectors fetched per round-trip (1..=255, one request byte on the wire).
    pub ahead_range: u8,
    /// Memory budget for the block cache; must fit at least one block.
    pub memory_limit: usize,
    /// Acknowledge writes locally without sending them.
    pub read_only: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            sector_size: DEFAULT_SECTOR_SIZE,
            ahead_range: DEFAULT_AHEAD_RANGE,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            read_only: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DriveStats {
    /// Wire bytes received on the read path (length prefixes + payloads).
    pub bytes_read: u64,
    /// Wire bytes sent on the write path.
    pub bytes_written: u64,
    /// READ requests that went to the server.
    pub round_trips: u64,
}

/// Blocking drive engine over a [`Transport`].
///
/// One drive owns one connection, one block scratch, one LZ4 scratch and one
/// cache; there is at most one request in flight (`read`/`write` take
/// `&mut self` and return only once the exchange finishes or fails).
pub struct Drive<T> {
    transport: T,
    sector_size: usize,
    ahead_range: u8,
    read_only: bool,
    cache: BlockCache,
    codec: Lz4BlockCodec,
    block_buf: Vec<u8>,
    stats: DriveStats,
}

impl<T: Transport> Drive<T> {
    pub fn new(transport: T, config: DriveConfig) -> Result<Self> {
        let cache = BlockCache::new(config.sector_size, config.ahead_range, config.memory_limit)?;
        let block_buf = vec![0u8; cache.block_size()];
        Ok(Self {
            transport,
            sector_size: config.sector_size,
            ahead_range: config.ahead_range,
            read_only: config.read_only,
            cache,
            codec: Lz4BlockCodec::new(),
            block_buf,
            stats: DriveStats::default(),
        })
    }

    /// Read one sector into `out`.
    ///
    /// Served from the cache when the containing block is resident; otherwise
    /// fetches a whole block of `ahead_range` sectors, installs it and copies
    /// the requested sector out. The cache is only mutated after the payload
    /// decoded to the exact block size.
    pub fn read(&mut self, sector: u32, out: &mut [u8]) -> Result<()> {
        if out.len() != self.sector_size {
            return Err(DriveError::BadBufferLen {
                len: out.len(),
                expected: self.sector_size,
            });
        }

        if let Some(cached) = self.cache.lookup(sector) {
            out.copy_from_slice(cached);
            return Ok(());
        }

        let origin = self.cache.origin_of(sector);
        self.transport
            .send_all(&[CMD_READ])
            .map_err(|err| DriveError::transport(WireStage::Command, err))?;
        self.transport
            .send_all(&origin.to_le_bytes())
            .map_err(|err| DriveError::transport(WireStage::Sector, err))?;
        self.transport
            .send_all(&[self.ahead_range])
            .map_err(|err| DriveError::transport(WireStage::Payload, err))?;

        let mut prefix = [0u8; LEN_PREFIX_LEN];
        self.transport
            .recv_all(&mut prefix)
            .map_err(|err| DriveError::transport(WireStage::LenPrefix, err))?;
        let compressed = read_len_prefix(prefix) as usize;

        if compressed > self.block_buf.len() {
            // Nonconforming server; the connection is desynchronized from
            // here on, which the caller resolves by closing the drive.
            return Err(DriveError::Codec(crate::codec::CodecError::TooLarge {
                len: compressed,
                max: self.block_buf.len(),
            }));
        }
        self.transport
            .recv_all(&mut self.block_buf[..compressed])
            .map_err(|err| DriveError::transport(WireStage::Block, err))?;

        self.codec.decode_block(&mut self.block_buf, compressed)?;

        self.cache.install(origin, &self.block_buf);
        let offset = (sector - origin) as usize * self.sector_size;
        out.copy_from_slice(&self.block_buf[offset..offset + self.sector_size]);

        self.stats.round_trips += 1;
        self.stats.bytes_read += (LEN_PREFIX_LEN + compressed) as u64;
        Ok(())
    }

    /// Write one sector, write-through and fire-and-forget.
    ///
    /// The cached copy (if any) is patched first, so a read served from the
    /// cache immediately after a failed send still sees the new bytes; the
    /// server holds or will hold the same data once the caller retries.
    pub fn write(&mut self, sector: u32, src: &[u8]) -> Result<()> {
        if src.len() != self.sector_size {
            return Err(DriveError::BadBufferLen {
                len: src.len(),
                expected: self.sector_size,
            });
        }

        self.cache.patch(sector, src);
        if self.read_only {
            return Ok(());
        }

        self.transport
            .send_all(&[CMD_WRITE])
            .map_err(|err| DriveError::transport(WireStage::Command, err))?;
        self.transport
            .send_all(&sector.to_le_bytes())
            .map_err(|err| DriveError::transport(WireStage::Sector, err))?;
        self.transport
            .send_all(src)
            .map_err(|err| DriveError::transport(WireStage::Payload, err))?;

        self.stats.bytes_written += (WRITE_HEADER_LEN + src.len()) as u64;
        Ok(())
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn ahead_range(&self) -> u8 {
        self.ahead_range
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn stats(&self) -> DriveStats {
        self.stats
    }

    pub fn cache_stats(&self) -> BlockCacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl Drive<TcpTransport> {
    /// Connect to a drive service at `tcp://host[:port]`, `host[:port]` or a
    /// bare hostname (default port 8001).
    pub fn connect(endpoint: &str, config: DriveConfig) -> Result<Self> {
        let (host, port) = parse_endpoint(endpoint)?;
        let stream = TcpStream::connect((host, port))
            .map_err(|err| DriveError::Connect(format!("{host}:{port}: {err}")))?;
        // Requests are a handful of bytes; do not let Nagle hold them back.
        let _ = stream.set_nodelay(true);
        tracing::debug!(host, port, "drive connected");
        Self::new(StreamTransport::new(stream), config)
    }
}

fn parse_endpoint(endpoint: &str) -> Result<(&str, u16)> {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Err(DriveError::Connect(
            "WebSocket endpoints require the async drive".into(),
        ));
    }
    let rest = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.is_empty() {
        return Err(DriveError::Connect("empty endpoint".into()));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
            Ok(port) => Ok((host, port)),
            Err(_) => Err(DriveError::Connect(format!("invalid port in {endpoint:?}"))),
        },
        _ => Ok((rest, DEFAULT_TCP_PORT)),
    }
}
