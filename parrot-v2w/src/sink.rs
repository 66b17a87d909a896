//! Output container writer
//!
//! Two containers are supported: WAV (through hound) and a null container
//! that accepts any codec and performs no I/O.
//!
//! A sink dropped before its trailer is written removes the partial output
//! file when `remove_partial` is set, so an aborted conversion never leaves
//! a file that looks complete.

use crate::codecs;
use crate::encoder::EncodedPacket;
use crate::error::{ConvertError, ErrorCode, Result};
use crate::resources::{ResourceGuard, ResourceKind, ResourceLedger};
use hound::{WavSpec, WavWriter};
use serde::Deserialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use symphonia::core::codecs::{CodecType, CODEC_TYPE_PCM_S16LE};
use tracing::{debug, warn};

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Wav,
    Null,
}

impl ContainerFormat {
    /// Guess the container from a path's extension
    pub fn guess(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "wav" | "wave" => Some(ContainerFormat::Wav),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContainerFormat::Wav => "wav",
            ContainerFormat::Null => "null",
        }
    }

    /// Whether the container can store `codec`
    pub fn accepts(self, codec: CodecType) -> bool {
        match self {
            ContainerFormat::Wav => codec == CODEC_TYPE_PCM_S16LE,
            ContainerFormat::Null => true,
        }
    }
}

/// Parameters of the single output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub codec: CodecType,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SinkState {
    Created,
    StreamAdded,
    HeaderWritten,
    TrailerWritten,
    Closed,
}

enum WavIo {
    /// Opened, header not yet written
    File(BufWriter<File>),
    Writer(WavWriter<BufWriter<File>>),
    Finished,
}

/// File handle of a WAV sink
struct SinkOutput {
    io: WavIo,
    _guard: ResourceGuard,
}

pub struct SinkWriter {
    // Declared first: the I/O handle is released before the context
    output: Option<SinkOutput>,
    format: ContainerFormat,
    path: PathBuf,
    stream: Option<StreamParams>,
    state: SinkState,
    last_pts: Option<u64>,
    packets_written: u64,
    remove_partial: bool,
    _guard: ResourceGuard,
}

impl SinkWriter {
    /// Allocate the output context and open the target file
    pub fn create(
        path: &Path,
        format_override: Option<ContainerFormat>,
        remove_partial: bool,
        ledger: &ResourceLedger,
    ) -> Result<Self> {
        let format = format_override
            .or_else(|| ContainerFormat::guess(path))
            .ok_or_else(|| {
                ConvertError::AllocationFailed(format!(
                    "could not deduce output format from {}",
                    path.display()
                ))
            })?;

        let context_guard = ledger.acquire(ResourceKind::SinkContext);
        let output = match format {
            ContainerFormat::Wav => {
                let file = File::create(path).map_err(|e| ConvertError::IoOpenFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                Some(SinkOutput {
                    io: WavIo::File(BufWriter::new(file)),
                    _guard: ledger.acquire(ResourceKind::SinkIo),
                })
            }
            ContainerFormat::Null => None,
        };

        debug!(path = %path.display(), format = format.name(), "Sink created");

        Ok(Self {
            output,
            format,
            path: path.to_path_buf(),
            stream: None,
            state: SinkState::Created,
            last_pts: None,
            packets_written: 0,
            remove_partial,
            _guard: context_guard,
        })
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Declare the output stream
    pub fn add_stream(&mut self, params: StreamParams) -> Result<()> {
        if self.state != SinkState::Created {
            return Err(ConvertError::codec(
                "add output stream",
                ErrorCode::InvalidArgument,
                "output already has a stream",
            ));
        }
        if !self.format.accepts(params.codec) {
            return Err(ConvertError::codec(
                "add output stream",
                ErrorCode::Unsupported,
                format!(
                    "{} container cannot store {}",
                    self.format.name(),
                    codecs::library().codec_label(params.codec)
                ),
            ));
        }
        self.stream = Some(params);
        self.state = SinkState::StreamAdded;
        Ok(())
    }

    /// Write the container header
    pub fn write_header(&mut self) -> Result<()> {
        let params = match (self.state, self.stream) {
            (SinkState::StreamAdded, Some(params)) => params,
            _ => {
                return Err(ConvertError::codec(
                    "write header",
                    ErrorCode::InvalidArgument,
                    "no output stream declared",
                ))
            }
        };

        if let Some(output) = self.output.as_mut() {
            let io = std::mem::replace(&mut output.io, WavIo::Finished);
            let file = match io {
                WavIo::File(file) => file,
                _ => {
                    return Err(ConvertError::codec(
                        "write header",
                        ErrorCode::InvalidArgument,
                        "header already written",
                    ))
                }
            };
            let spec = WavSpec {
                channels: params.channels,
                sample_rate: params.sample_rate,
                bits_per_sample: params.bits_per_sample,
                sample_format: hound::SampleFormat::Int,
            };
            let writer =
                WavWriter::new(file, spec).map_err(|e| ConvertError::from_hound("write header", &e))?;
            output.io = WavIo::Writer(writer);
        }

        self.state = SinkState::HeaderWritten;
        Ok(())
    }

    /// Write one packet; the payload buffer is handed back for reuse
    pub fn write_packet(&mut self, packet: EncodedPacket) -> Result<Vec<u8>> {
        if self.state != SinkState::HeaderWritten {
            return Err(ConvertError::codec(
                "write packet",
                ErrorCode::InvalidArgument,
                "header not written or trailer already written",
            ));
        }
        if let Some(last) = self.last_pts {
            if packet.pts <= last {
                return Err(ConvertError::codec(
                    "write packet",
                    ErrorCode::NonMonotonicTimestamp,
                    format!("pts {} after {}", packet.pts, last),
                ));
            }
        }

        if let Some(SinkOutput {
            io: WavIo::Writer(writer),
            ..
        }) = self.output.as_mut()
        {
            if packet.data.len() % 2 != 0 {
                return Err(ConvertError::codec(
                    "write packet",
                    ErrorCode::InvalidArgument,
                    format!("payload of {} bytes is not whole 16-bit samples", packet.data.len()),
                ));
            }
            for bytes in packet.data.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))
                    .map_err(|e| ConvertError::from_hound("write packet", &e))?;
            }
        }

        self.last_pts = Some(packet.pts);
        self.packets_written += 1;
        Ok(packet.data)
    }

    /// Finalize the container
    pub fn write_trailer(&mut self) -> Result<()> {
        if self.state != SinkState::HeaderWritten {
            return Err(ConvertError::codec(
                "write trailer",
                ErrorCode::InvalidArgument,
                "header not written or trailer already written",
            ));
        }
        if let Some(output) = self.output.as_mut() {
            if let WavIo::Writer(writer) = std::mem::replace(&mut output.io, WavIo::Finished) {
                writer
                    .finalize()
                    .map_err(|e| ConvertError::from_hound("write trailer", &e))?;
            }
        }
        self.state = SinkState::TrailerWritten;
        debug!(path = %self.path.display(), packets = self.packets_written, "Trailer written");
        Ok(())
    }

    /// Mark the output finished
    ///
    /// The file itself is closed by the trailer; the I/O resource is
    /// released with the sink. Closing before the trailer discards the
    /// partial output.
    pub fn close(&mut self) {
        if self.state >= SinkState::TrailerWritten {
            self.state = SinkState::Closed;
        } else {
            self.discard_output();
        }
    }

    fn discard_output(&mut self) {
        let Some(output) = self.output.take() else {
            return;
        };
        // Dropping hound's writer patches the header; the file goes anyway
        drop(output);
        if self.remove_partial {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "Removed partial output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove partial output")
                }
            }
        }
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        if self.state < SinkState::TrailerWritten {
            self.discard_output();
        }
    }
}
