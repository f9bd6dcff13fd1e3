use thiserror::Error;

/// Capacity of the compressed-input scratch. Sized for the worst case block
/// of 255 sectors of 512 bytes.
pub const COMPRESSED_SCRATCH: usize = 128 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("compressed payload of {len} bytes exceeds the {max} byte scratch")]
    TooLarge { len: usize, max: usize },

    #[error("corrupt block payload: {0}")]
    Corrupt(String),
}

/// LZ4 block decoder with a private, per-instance scratch buffer.
///
/// A payload whose compressed length equals the decoded length is raw and is
/// left untouched; LZ4 is never invoked for it.
pub struct Lz4BlockCodec {
    scratch: Box<[u8]>,
}

impl Lz4BlockCodec {
    pub fn new() -> Self {
        Self {
            scratch: vec![0u8; COMPRESSED_SCRATCH].into_boxed_slice(),
        }
    }

    /// Decode `buf[..compressed_len]` in place to fill all of `buf`.
    ///
    /// The compressed bytes are staged through the scratch so the block can
    /// be decompressed back into the buffer they arrived in.
    pub fn decode_block(&mut self, buf: &mut [u8], compressed_len: usize) -> Result<(), CodecError> {
        if compressed_len == buf.len() {
            return Ok(());
        }
        if compressed_len > self.scratch.len() {
            return Err(CodecError::TooLarge {
                len: compressed_len,
                max: self.scratch.len(),
            });
        }
        // A conforming server never sends a payload larger than the block it
        // decodes to; reject rather than index past the buffer.
        if compressed_len > buf.len() {
            return Err(CodecError::TooLarge {
                len: compressed_len,
                max: buf.len(),
            });
        }
        self.scratch[..compressed_len].copy_from_slice(&buf[..compressed_len]);
        match lz4_flex::block::decompress_into(&self.scratch[..compressed_len], buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => Err(CodecError::Corrupt(format!(
                "decoded {n} bytes, expected {}",
                buf.len()
            ))),
            Err(err) => Err(CodecError::Corrupt(err.to_string())),
        }
    }
}

impl Default for Lz4BlockCodec {
    fn default() -> Self {
        Self::new()
    }
}
