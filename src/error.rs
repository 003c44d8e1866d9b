//! Error types shared by the codec, writer, registry and orchestrator.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed tag at offset {offset}: {reason}")]
    MalformedTag { offset: u64, reason: String },

    #[error("payload of {0} bytes exceeds the 24-bit tag size limit")]
    PayloadTooLarge(usize),

    #[error("not an FLV container: {0}")]
    InvalidContainer(String),

    #[error("stream {0} already has a publisher")]
    AlreadyPublished(String),

    #[error("cannot subscribe to stream {0}")]
    SubscriptionFailure(String),

    #[error("track negotiation failed for stream {stream}: {reason}")]
    TrackNegotiation { stream: String, reason: String },

    #[error("already recording to {}", .0.display())]
    AlreadyRecording(PathBuf),

    #[error("no recording session for {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid stream path: {0}")]
    InvalidStreamPath(String),

    #[error("container writer is closed")]
    WriterClosed,
}

impl RecordError {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        RecordError::MalformedTag { offset, reason: reason.into() }
    }
}

pub type RecordResult<T> = Result<T, RecordError>;
