//! Error types for parsing, decoding and constructing animated images.

/// The source bytes could not be turned into an [`AnimatedImageSource`](crate::AnimatedImageSource).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed GIF header: {0}")]
    MalformedHeader(String),

    #[error("invalid canvas size {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },

    #[error("source contains no frames")]
    NoFrames,

    #[error("truncated stream after {frames_read} frame(s): {reason}")]
    Truncated { frames_read: usize, reason: String },

    #[error("corrupt stream after {frames_read} frame(s): {reason}")]
    Corrupt { frames_read: usize, reason: String },
}

/// A single frame could not be decoded. The frame stays unavailable for the
/// lifetime of the image; other frames are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame {index} is out of range (frame count {frame_count})")]
    OutOfRange { index: usize, frame_count: usize },

    #[error("frame {index} is corrupt: {reason}")]
    Corrupt { index: usize, reason: String },

    #[error("stream ended before frame {index}")]
    MissingFrame { index: usize },

    #[error("frame {index} decoded to {width}x{height}, expected {expected_width}x{expected_height}")]
    SizeMismatch {
        index: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("out of memory while decoding frame {index} ({bytes} bytes requested)")]
    OutOfMemory { index: usize, bytes: usize },
}

impl DecodeError {
    /// Allocation failures additionally shrink the cache window.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Construction of an [`AnimatedImage`](crate::AnimatedImage) failed.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to parse animated image: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to decode poster frame: {0}")]
    Poster(#[source] DecodeError),

    #[error("failed to start prefetch worker: {0}")]
    Worker(#[source] std::io::Error),
}
