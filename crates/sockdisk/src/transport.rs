use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("recv failed: {0}")]
    Recv(String),

    #[error("connection closed by peer")]
    Closed,
}

/// A fully-buffered byte pipe: both operations either transfer the whole
/// buffer or fail. Partial progress never escapes this seam.
pub trait Transport {
    fn send_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    fn recv_all(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;
}

/// [`Transport`] over any blocking byte stream, `std::net::TcpStream` in
/// production.
pub struct StreamTransport<S> {
    stream: S,
}

pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S: Read + Write> Transport for StreamTransport<S> {
    fn send_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let mut sent = 0;
        while sent < buf.len() {
            match self.stream.write(&buf[sent..]) {
                Ok(0) => return Err(TransportError::Send("stream refused bytes".into())),
                Ok(n) => sent += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::yield_now();
                }
                Err(err) => return Err(TransportError::Send(err.to_string())),
            }
        }
        self.stream
            .flush()
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    fn recv_all(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // A non-blocking socket must not spin at full speed here.
                    std::thread::yield_now();
                }
                Err(err) => return Err(TransportError::Recv(err.to_string())),
            }
        }
        Ok(())
    }
}

/// In-memory byte stream used for tests.
///
/// Bytes written through it accumulate in a transcript; reads are served from
/// queued chunks, at most one chunk per `read` call, so callers exercise the
/// short-read path of [`StreamTransport`]. An exhausted queue reads as EOF.
#[derive(Debug, Default)]
pub struct MemStream {
    chunks: VecDeque<Vec<u8>>,
    written: Vec<u8>,
}

impl MemStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be served by subsequent reads as a single chunk.
    pub fn push_chunk(&mut self, bytes: impl Into<Vec<u8>>) {
        self.chunks.push_back(bytes.into());
    }

    /// Everything sent through this stream so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn clear_written(&mut self) {
        self.written.clear();
    }
}

impl Read for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.chunks.push_front(chunk);
        }
        Ok(n)
    }
}

impl Write for MemStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
