#![cfg(not(target_arch = "wasm32"))]

//! Cooperative-async flavor of the drive engine.
//!
//! The contract is the blocking one (a call returns once the exchange
//! finishes or fails, and there is never more than one request in flight),
//! but the suspension happens in the host runtime at the transport awaits
//! instead of blocking a thread on a socket.

use crate::cache::{BlockCache, BlockCacheStats};
use crate::codec::{CodecError, Lz4BlockCodec};
use crate::drive::{DriveConfig, DriveStats};
use crate::error::{DriveError, Result, WireStage};
use crate::transport::TransportError;
use futures_util::{SinkExt, StreamExt};
use sockdisk_protocol::{encode_read_request, encode_write_request, read_len_prefix, LEN_PREFIX_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Async counterpart of [`crate::Transport`]: total send and recv over an
/// ordered, reliable byte pipe.
#[allow(async_fn_in_trait)]
pub trait AsyncTransport {
    async fn send_all(&mut self, buf: &[u8]) -> std::result::Result<(), TransportError>;

    async fn recv_all(&mut self, buf: &mut [u8]) -> std::result::Result<(), TransportError>;
}

/// [`AsyncTransport`] over any tokio byte stream, `tokio::net::TcpStream` in
/// production.
pub struct AsyncStreamTransport<S> {
    stream: S,
}

impl<S> AsyncStreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncTransport for AsyncStreamTransport<S> {
    async fn send_all(&mut self, buf: &[u8]) -> std::result::Result<(), TransportError> {
        self.stream
            .write_all(buf)
            .await
            .map_err(|err| TransportError::Send(err.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn recv_all(&mut self, buf: &mut [u8]) -> std::result::Result<(), TransportError> {
        match self.stream.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(TransportError::Closed)
            }
            Err(err) => Err(TransportError::Recv(err.to_string())),
        }
    }
}

/// What the service reports after a successful text handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub write_allowed: bool,
    /// The server's preferred ahead range; a hint, the client keeps its own.
    pub ahead_range: u8,
    pub size_bytes: u64,
}

/// Byte pipe over a WebSocket connection.
///
/// Binary messages carry the same stream the TCP transport carries; message
/// boundaries have no protocol meaning, so leftover bytes of a message are
/// kept for the next recv. `send_all` maps to one binary message.
pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    pending: Vec<u8>,
    pos: usize,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| DriveError::Connect(format!("{url}: {err}")))?;
        tracing::debug!(url, "websocket connected");
        Ok(Self {
            ws,
            pending: Vec::new(),
            pos: 0,
        })
    }

    /// Authenticate against the drive service: send `owner&name&token`, wait
    /// for the `"read|write,<ahead>,<size_kib>"` reply, then consume the one
    /// preload frame the service sends before the binary protocol starts.
    /// Any other text reply is the server's refusal message.
    pub async fn handshake(
        &mut self,
        owner: &str,
        name: &str,
        token: &str,
    ) -> Result<HandshakeInfo> {
        self.ws
            .send(Message::Text(format!("{owner}&{name}&{token}")))
            .await
            .map_err(|err| DriveError::Connect(format!("handshake send: {err}")))?;

        let info = loop {
            match self.ws.next().await {
                None => {
                    return Err(DriveError::Connect(
                        "connection closed during handshake".into(),
                    ))
                }
                Some(Err(err)) => return Err(DriveError::Connect(format!("handshake: {err}"))),
                Some(Ok(Message::Text(reply))) => break parse_handshake_reply(&reply)?,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) => {
                    return Err(DriveError::HandshakeRejected(
                        "unexpected non-text reply".into(),
                    ))
                }
            }
        };

        // One preload frame follows the grant line. It precedes the binary
        // protocol; skipping it here keeps response framing aligned from the
        // first request on.
        loop {
            match self.ws.next().await {
                None | Some(Ok(Message::Close(_))) => {
                    return Err(DriveError::Connect(
                        "connection closed during handshake".into(),
                    ))
                }
                Some(Err(err)) => return Err(DriveError::Connect(format!("handshake: {err}"))),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) => break,
            }
        }

        Ok(info)
    }
}

fn parse_handshake_reply(reply: &str) -> Result<HandshakeInfo> {
    let mut fields = reply.split(',');
    let mode = fields.next().unwrap_or_default();
    let write_allowed = match mode {
        "write" => true,
        "read" => false,
        _ => return Err(DriveError::HandshakeRejected(reply.to_string())),
    };
    let ahead_range = fields
        .next()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .ok_or_else(|| DriveError::HandshakeRejected(reply.to_string()))?;
    let size_kib = fields
        .next()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| DriveError::HandshakeRejected(reply.to_string()))?;
    Ok(HandshakeInfo {
        write_allowed,
        ahead_range,
        size_bytes: size_kib * 1024,
    })
}

impl AsyncTransport for WsTransport {
    async fn send_all(&mut self, buf: &[u8]) -> std::result::Result<(), TransportError> {
        self.ws
            .send(Message::Binary(buf.to_vec()))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn recv_all(&mut self, buf: &mut [u8]) -> std::result::Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos < self.pending.len() {
                let n = (self.pending.len() - self.pos).min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
                self.pos += n;
                filled += n;
                continue;
            }
            match self.ws.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(err)) => return Err(TransportError::Recv(err.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    self.pending = bytes;
                    self.pos = 0;
                }
                // tungstenite queues the pong reply itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                Some(Ok(other)) => {
                    return Err(TransportError::Recv(format!(
                        "unexpected non-binary frame: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Async drive engine; same cache, codec and wire exchange as
/// [`crate::Drive`], with whole requests sent as single frames.
pub struct AsyncDrive<T> {
    transport: T,
    sector_size: usize,
    ahead_range: u8,
    read_only: bool,
    handshake: Option<HandshakeInfo>,
    cache: BlockCache,
    codec: Lz4BlockCodec,
    block_buf: Vec<u8>,
    stats: DriveStats,
}

impl<T: AsyncTransport> AsyncDrive<T> {
    pub fn new(transport: T, config: DriveConfig) -> Result<Self> {
        let cache = BlockCache::new(config.sector_size, config.ahead_range, config.memory_limit)?;
        let block_buf = vec![0u8; cache.block_size()];
        Ok(Self {
            transport,
            sector_size: config.sector_size,
            ahead_range: config.ahead_range,
            read_only: config.read_only,
            handshake: None,
            cache,
            codec: Lz4BlockCodec::new(),
            block_buf,
            stats: DriveStats::default(),
        })
    }

    pub async fn read(&mut self, sector: u32, out: &mut [u8]) -> Result<()> {
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
        let request = encode_read_request(origin, self.ahead_range)
            .map_err(|_| DriveError::InvalidConfig("unencodable read request"))?;
        self.transport
            .send_all(&request)
            .await
            .map_err(|err| DriveError::transport(WireStage::Command, err))?;

        let mut prefix = [0u8; LEN_PREFIX_LEN];
        self.transport
            .recv_all(&mut prefix)
            .await
            .map_err(|err| DriveError::transport(WireStage::LenPrefix, err))?;
        let compressed = read_len_prefix(prefix) as usize;

        if compressed > self.block_buf.len() {
            return Err(DriveError::Codec(CodecError::TooLarge {
                len: compressed,
                max: self.block_buf.len(),
            }));
        }
        self.transport
            .recv_all(&mut self.block_buf[..compressed])
            .await
            .map_err(|err| DriveError::transport(WireStage::Block, err))?;

        self.codec.decode_block(&mut self.block_buf, compressed)?;

        self.cache.install(origin, &self.block_buf);
        let offset = (sector - origin) as usize * self.sector_size;
        out.copy_from_slice(&self.block_buf[offset..offset + self.sector_size]);

        self.stats.round_trips += 1;
        self.stats.bytes_read += (LEN_PREFIX_LEN + compressed) as u64;
        Ok(())
    }

    pub async fn write(&mut self, sector: u32, src: &[u8]) -> Result<()> {
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

        let request = encode_write_request(sector, src)
            .map_err(|_| DriveError::InvalidConfig("unencodable write request"))?;
        self.transport
            .send_all(&request)
            .await
            .map_err(|err| DriveError::transport(WireStage::Command, err))?;

        self.stats.bytes_written += request.len() as u64;
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

    pub fn handshake_info(&self) -> Option<&HandshakeInfo> {
        self.handshake.as_ref()
    }

    pub fn stats(&self) -> DriveStats {
        self.stats
    }

    pub fn cache_stats(&self) -> BlockCacheStats {
        self.cache.stats()
    }
}

impl AsyncDrive<WsTransport> {
    /// Connect a WebSocket drive. When any credential is non-empty the
    /// service handshake runs first; a read-only grant turns the drive
    /// read-only regardless of the requested config.
    pub async fn open(
        url: &str,
        owner: &str,
        name: &str,
        token: &str,
        config: DriveConfig,
    ) -> Result<Self> {
        let mut transport = WsTransport::connect(url).await?;
        let mut config = config;
        let mut info = None;
        if !(owner.is_empty() && name.is_empty() && token.is_empty()) {
            let handshake = transport.handshake(owner, name, token).await?;
            if !handshake.write_allowed {
                config.read_only = true;
            }
            tracing::debug!(
                write_allowed = handshake.write_allowed,
                size_bytes = handshake.size_bytes,
                "drive handshake complete"
            );
            info = Some(handshake);
        }
        let mut drive = Self::new(transport, config)?;
        drive.handshake = info;
        Ok(drive)
    }
}
