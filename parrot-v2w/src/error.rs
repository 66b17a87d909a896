//! Error types for parrot-v2w
//!
//! Every failure of the codec stack (symphonia, rubato, hound, file I/O) is
//! classified into an [`ErrorCode`] and wrapped with the operation that
//! failed, so a caller always sees both the numeric code and its text.
//!
//! Cancellation is not an error: it is reported as
//! [`ConversionOutcome::Cancelled`](crate::pipeline::ConversionOutcome).

use std::fmt;
use std::path::PathBuf;
use symphonia::core::errors::Error as SymphoniaError;
use thiserror::Error;

/// Numeric error codes of the codec layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Read/write failure on the underlying stream
    Io = -1,
    /// Malformed or corrupt media data
    InvalidData = -2,
    /// Feature, codec or container not supported
    Unsupported = -3,
    /// A decoder/demuxer resource limit was hit
    LimitExceeded = -4,
    /// Stream parameters changed and the decoder needs a reset
    ResetRequired = -5,
    /// Seeking failed
    Seek = -6,
    /// Caller passed parameters the component cannot accept
    InvalidArgument = -7,
    /// Component already flushed / finished
    EndOfStream = -8,
    /// Packet timestamps not increasing
    NonMonotonicTimestamp = -9,
    /// Experimental component refused under strict compliance
    Experimental = -10,
    /// Sample-rate converter failure
    Resample = -11,
}

impl ErrorCode {
    /// Raw numeric value
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Human-readable text for the code
    pub fn describe(self) -> &'static str {
        match self {
            ErrorCode::Io => "I/O error",
            ErrorCode::InvalidData => "Invalid data found when processing input",
            ErrorCode::Unsupported => "Not supported",
            ErrorCode::LimitExceeded => "Resource limit exceeded",
            ErrorCode::ResetRequired => "Stream parameters changed, decoder reset required",
            ErrorCode::Seek => "Seek failed",
            ErrorCode::InvalidArgument => "Invalid argument",
            ErrorCode::EndOfStream => "End of stream",
            ErrorCode::NonMonotonicTimestamp => "Non-monotonic packet timestamp",
            ErrorCode::Experimental => "Experimental feature refused by strict compliance",
            ErrorCode::Resample => "Sample rate conversion failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// Main error type for parrot-v2w
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Source file does not exist
    #[error("Source file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Container could not be probed
    #[error("Unsupported input format {}: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// Input has no decodable audio stream
    #[error("No audio stream found in {}", .0.display())]
    NoAudioStream(PathBuf),

    /// No decoder registered for the source codec
    #[error("No decoder available for codec {0}")]
    NoDecoder(String),

    /// No encoder available for the requested output codec
    #[error("No encoder available for codec {0}")]
    NoEncoder(String),

    /// A pipeline component could not be allocated/configured
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// Output file could not be opened for writing
    #[error("Failed to open output {}: {source}", path.display())]
    IoOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A codec-layer operation failed
    #[error("Failed to {operation}: {message} (code {code})")]
    CodecOperationFailed {
        operation: &'static str,
        code: ErrorCode,
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversion worker panicked or was aborted
    #[error("Conversion worker failed: {0}")]
    Worker(String),
}

impl ConvertError {
    /// Build a codec failure whose message is the code's text plus detail
    pub fn codec(operation: &'static str, code: ErrorCode, detail: impl fmt::Display) -> Self {
        ConvertError::CodecOperationFailed {
            operation,
            code,
            message: format!("{}: {}", code.describe(), detail),
        }
    }

    /// Wrap a symphonia error
    pub fn from_symphonia(operation: &'static str, err: &SymphoniaError) -> Self {
        Self::codec(operation, classify_symphonia(err), err)
    }

    /// Wrap a hound error
    pub fn from_hound(operation: &'static str, err: &hound::Error) -> Self {
        Self::codec(operation, classify_hound(err), err)
    }

    /// Numeric code if this is a codec-layer failure
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ConvertError::CodecOperationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Map a symphonia error onto the code space
pub fn classify_symphonia(err: &SymphoniaError) -> ErrorCode {
    match err {
        SymphoniaError::IoError(_) => ErrorCode::Io,
        SymphoniaError::DecodeError(_) => ErrorCode::InvalidData,
        SymphoniaError::SeekError(_) => ErrorCode::Seek,
        SymphoniaError::Unsupported(_) => ErrorCode::Unsupported,
        SymphoniaError::LimitError(_) => ErrorCode::LimitExceeded,
        SymphoniaError::ResetRequired => ErrorCode::ResetRequired,
    }
}

/// Map a hound error onto the code space
pub fn classify_hound(err: &hound::Error) -> ErrorCode {
    match err {
        hound::Error::IoError(_) => ErrorCode::Io,
        hound::Error::Unsupported | hound::Error::InvalidSampleFormat => ErrorCode::Unsupported,
        hound::Error::TooWide => ErrorCode::InvalidArgument,
        _ => ErrorCode::InvalidData,
    }
}

/// Convenience Result type using parrot-v2w ConvertError
pub type Result<T> = std::result::Result<T, ConvertError>;
