use crate::codec::CodecError;
use crate::transport::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriveError>;

/// Position in the request/response exchange at which a transport call
/// failed. Each stage has a fixed numeric status (see [`DriveError::status`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStage {
    /// Sending the command byte.
    Command,
    /// Sending the origin (READ) or sector (WRITE) field.
    Sector,
    /// Sending the ahead-range byte (READ) or the sector payload (WRITE).
    Payload,
    /// Receiving the response length prefix.
    LenPrefix,
    /// Receiving the response payload.
    Block,
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("invalid drive handle")]
    InvalidHandle,

    #[error("buffer of {len} bytes does not match the {expected} byte sector size")]
    BadBufferLen { len: usize, expected: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("transport failed at {stage:?}: {source}")]
    Transport {
        stage: WireStage,
        source: TransportError,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DriveError {
    pub(crate) fn transport(stage: WireStage, source: TransportError) -> Self {
        DriveError::Transport { stage, source }
    }

    /// Numeric status of this error, preserving the original C ABI table:
    /// 1 invalid handle (also argument and open-time misuse), 2-4 send
    /// failures by field, 5-6 recv failures, negative codec failures.
    pub fn status(&self) -> i32 {
        match self {
            DriveError::InvalidHandle
            | DriveError::BadBufferLen { .. }
            | DriveError::InvalidConfig(_)
            | DriveError::Connect(_)
            | DriveError::HandshakeRejected(_) => 1,
            DriveError::Transport { stage, .. } => match stage {
                WireStage::Command => 2,
                WireStage::Sector => 3,
                WireStage::Payload => 4,
                WireStage::LenPrefix => 5,
                WireStage::Block => 6,
            },
            DriveError::Codec(CodecError::TooLarge { .. }) => -1,
            DriveError::Codec(CodecError::Corrupt(_)) => -2,
        }
    }
}
