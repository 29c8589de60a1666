use thiserror::Error;

/// Failures that end a relay session.
///
/// End-of-stream and empty payloads are not errors; they never appear here.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to open stream '{url}': {source}")]
    StreamOpen {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("decoder fault after {frame} frames: {source}")]
    DecodeFault {
        frame: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("recognition engine failed on frame {frame}: {source}")]
    Recognition {
        frame: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("descriptor size {size} exceeds buffer capacity {capacity}")]
    DescriptorOverflow { size: usize, capacity: usize },

    #[error("relay worker panicked")]
    WorkerPanicked,
}

impl RelayError {
    pub fn stream_open(url: &str, source: anyhow::Error) -> Self {
        RelayError::StreamOpen {
            url: url.to_string(),
            source,
        }
    }
}
