use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to {op} {}: {source}", path.display())]
    FileOperation {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid timeline entry: duration={duration}, start_offset={start_offset}, expected offset {expected}")]
    InvalidTimelineEntry {
        duration: u64,
        start_offset: u64,
        expected: u64,
    },

    #[error("Segment writer is closed")]
    WriterClosed,

    #[error("Failed to render manifest: {0}")]
    ManifestRender(String),

    #[error("Peer connection has no local description")]
    MissingLocalDescription,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    WebRTCError(#[from] webrtc::Error),

    #[error(transparent)]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    ConfigError(#[from] toml::de::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),
}

impl RecorderError {
    pub(crate) fn file(
        op: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::FileOperation { op, path, source }
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;
