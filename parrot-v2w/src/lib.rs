//! # Parrot Video-to-WAV
//!
//! Extracts the audio track of a media file into a 16-bit PCM WAV file.
//!
//! ```text
//! SourceReader ─► AudioDecoder ─► Resampler ─► PcmEncoder ─► SinkWriter
//!   (demux)         (decode)      (s16, layout,   (pack)        (WAV)
//!                                  rate)
//! ```
//!
//! [`pipeline::Pipeline`] drives one conversion, [`service::AudioExtractor`]
//! runs it on a blocking worker and [`batch::BatchConverter`] converts a list
//! of files with aggregate progress.

pub mod batch;
pub mod buffers;
pub mod codecs;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod resampler;
pub mod resources;
pub mod service;
pub mod sink;
pub mod source;

pub use batch::{BatchConverter, BatchFailure, BatchReport};
pub use config::{Compliance, ExtractorConfig};
pub use error::{ConvertError, ErrorCode, Result};
pub use pipeline::{
    ChannelObserver, ConversionOutcome, ConversionRequest, ConversionState, Pipeline,
    PipelineState, ProgressObserver,
};
pub use resources::{LedgerEntry, ResourceKind, ResourceLedger};
pub use service::AudioExtractor;
pub use sink::ContainerFormat;
