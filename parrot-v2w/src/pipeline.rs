//! Single-file conversion pipeline
//!
//! ```text
//! Idle ──open──► Opened ──header──► Running ──┬─ end of stream ──► Completed
//!                                             ├─ cancellation ───► Cancelled
//!                                             └─ error ──────────► Failed
//! ```
//!
//! Resources are acquired in the order source, decoder, sink, encoder,
//! resampler, buffers and released in exactly the reverse order on every
//! exit path: they live in [`OpenedPipeline`], whose fields are declared
//! last-acquired first.

use crate::buffers::{PipelineBuffers, DEFAULT_POOL_SIZE};
use crate::codecs;
use crate::config::ExtractorConfig;
use crate::decoder::AudioDecoder;
use crate::encoder::{EncodedPacket, PcmEncoder};
use crate::error::{ConvertError, ErrorCode, Result};
use crate::resampler::{FrameSize, PcmFrame, Resampler, TargetFormat};
use crate::resources::ResourceLedger;
use crate::sink::{SinkWriter, StreamParams};
use crate::source::{ts_to_ticks, SourceReader, StreamDescriptor};
use chrono::Utc;
use parrot_common::{ConversionEvent, EventBus, FinishKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use symphonia::core::formats::FormatReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of one conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Opened,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }
}

/// Conversion status as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConversionState {
    pub is_converting: bool,
    /// Fraction complete, 0.0 - 1.0
    pub progress: f64,
}

/// Successful end of a conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Output written to this path
    Completed(PathBuf),
    /// Stopped by a cancellation request; no output left behind
    Cancelled,
}

/// Receives progress fractions as a conversion advances
///
/// Called from the conversion worker; implementations must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: f64);
}

impl<F> ProgressObserver for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, progress: f64) {
        self(progress)
    }
}

/// Forwards progress over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<f64>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<f64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, progress: f64) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(progress);
    }
}

/// What to convert and where to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub source_path: PathBuf,
    /// Explicit output path; derived from the source when absent
    pub target_path: Option<PathBuf>,
}

impl ConversionRequest {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: None,
        }
    }

    pub fn with_target(mut self, target_path: impl Into<PathBuf>) -> Self {
        self.target_path = Some(target_path.into());
        self
    }

    /// Output path: the explicit target, else `<source dir>/<stem>.<extension>`
    pub fn resolve_target(&self, extension: &str) -> PathBuf {
        match &self.target_path {
            Some(target) => target.clone(),
            None => self.source_path.with_extension(extension),
        }
    }

    /// Output path inside `dir`: `<dir>/<stem>.<extension>`
    pub fn target_in(&self, dir: &Path, extension: &str) -> PathBuf {
        let mut name = self
            .source_path
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "output".into());
        name.push(".");
        name.push(extension);
        dir.join(name)
    }
}

/// Resources of an opened pipeline, released in field order
struct OpenedPipeline {
    buffers: PipelineBuffers,
    resampler: Resampler,
    encoder: PcmEncoder,
    sink: SinkWriter,
    decoder: AudioDecoder,
    source: SourceReader,
    descriptor: StreamDescriptor,
}

impl OpenedPipeline {
    fn write_frames(&mut self, frames: Vec<PcmFrame>) -> Result<()> {
        for frame in frames {
            self.encoder.encode(&frame, &mut self.buffers.packets)?;
            self.buffers.frames.release(frame.samples);
            let packets = self.encoder.packets();
            self.write_packets(packets)?;
        }
        Ok(())
    }

    fn write_packets(&mut self, packets: Vec<EncodedPacket>) -> Result<()> {
        for packet in packets {
            let data = self.sink.write_packet(packet)?;
            self.buffers.packets.release(data);
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.resampler.discard();
        self.encoder.discard();
    }
}

/// One conversion from source file to WAV
pub struct Pipeline {
    id: Uuid,
    request: ConversionRequest,
    target_path: PathBuf,
    config: Arc<ExtractorConfig>,
    events: EventBus,
    ledger: ResourceLedger,
    state: PipelineState,
    conversion: ConversionState,
}

impl Pipeline {
    pub fn new(
        request: ConversionRequest,
        config: Arc<ExtractorConfig>,
        events: EventBus,
        ledger: ResourceLedger,
    ) -> Self {
        let target_path = request.resolve_target(&config.output_extension);
        Self {
            id: Uuid::new_v4(),
            request,
            target_path,
            config,
            events,
            ledger,
            state: PipelineState::Idle,
            conversion: ConversionState::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn conversion_state(&self) -> ConversionState {
        self.conversion
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Run the conversion to a terminal state
    ///
    /// Progress goes to `observer` and the event bus. `cancel` is checked
    /// once per source packet.
    pub fn run(
        &mut self,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutcome> {
        if self.state != PipelineState::Idle {
            return Err(ConvertError::codec(
                "start conversion",
                ErrorCode::InvalidArgument,
                "pipeline already ran",
            ));
        }

        let started = Instant::now();
        info!(
            source = %self.request.source_path.display(),
            target = %self.target_path.display(),
            "Starting conversion"
        );

        let result = self.execute(observer, cancel);
        self.conversion.is_converting = false;

        let (state, kind, message) = match &result {
            Ok(ConversionOutcome::Completed(_)) => {
                (PipelineState::Completed, FinishKind::Completed, None)
            }
            Ok(ConversionOutcome::Cancelled) => {
                (PipelineState::Cancelled, FinishKind::Cancelled, None)
            }
            Err(e) => (PipelineState::Failed, FinishKind::Failed, Some(e.to_string())),
        };
        self.transition(state);

        match &result {
            Ok(_) => info!(
                source = %self.request.source_path.display(),
                outcome = %kind,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Conversion finished"
            ),
            Err(e) => warn!(
                source = %self.request.source_path.display(),
                error = %e,
                "Conversion failed"
            ),
        }

        self.events.emit_lossy(ConversionEvent::ConversionFinished {
            conversion_id: self.id,
            source_path: self.request.source_path.clone(),
            target_path: self.target_path.clone(),
            kind,
            message,
            timestamp: Utc::now(),
        });

        result
    }

    fn execute(
        &mut self,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<ConversionOutcome> {
        let mut opened = self.open()?;
        self.transition(PipelineState::Opened);

        opened.sink.write_header()?;
        self.transition(PipelineState::Running);
        self.conversion = ConversionState {
            is_converting: true,
            progress: 0.0,
        };
        self.events.emit_lossy(ConversionEvent::ConversionStarted {
            conversion_id: self.id,
            source_path: self.request.source_path.clone(),
            target_path: self.target_path.clone(),
            timestamp: Utc::now(),
        });

        let frame_size = opened.encoder.frame_size();
        let total = opened.descriptor.total_duration_ticks;
        let time_base = opened.descriptor.time_base;
        let track_id = opened.descriptor.track_id;

        while let Some(packet) = opened.source.read_packet()? {
            if cancel.is_cancelled() {
                drop(packet);
                opened.discard();
                info!(source = %self.request.source_path.display(), "Conversion cancelled");
                return Ok(ConversionOutcome::Cancelled);
            }
            if packet.track_id() != track_id {
                continue;
            }

            let Some(frame) = opened.decoder.decode(&packet)? else {
                continue;
            };

            if total > 0 {
                let progress = (ts_to_ticks(frame.pts, time_base) as f64 / total as f64).clamp(0.0, 1.0);
                // 1.0 is reserved for completion
                if progress > self.conversion.progress && progress < 1.0 {
                    self.report(progress, observer);
                }
            }

            let frames =
                opened
                    .resampler
                    .convert(&frame.buffer, frame_size, &mut opened.buffers.frames)?;
            opened.write_frames(frames)?;
        }

        let frames = opened
            .resampler
            .drain(frame_size, &mut opened.buffers.frames)?;
        opened.write_frames(frames)?;
        let packets = opened.encoder.flush()?;
        opened.write_packets(packets)?;
        opened.sink.write_trailer()?;
        opened.sink.close();

        debug!(
            packets = opened.sink.packets_written(),
            skipped = opened.decoder.skipped_packets(),
            frames_allocated = opened.buffers.frames.total_allocated(),
            "Output complete"
        );

        self.report(1.0, observer);
        Ok(ConversionOutcome::Completed(self.target_path.clone()))
    }

    fn open(&self) -> Result<OpenedPipeline> {
        let source_path = &self.request.source_path;
        SourceReader::ensure_exists(source_path)?;
        if self.target_path == *source_path {
            return Err(ConvertError::codec(
                "open output",
                ErrorCode::InvalidArgument,
                "output path would overwrite the input",
            ));
        }

        let format = SourceReader::probe(source_path)?;
        self.open_stages(format)
    }

    /// Allocate every stage on top of a probed container
    fn open_stages(&self, format: Box<dyn FormatReader>) -> Result<OpenedPipeline> {
        let config = &self.config;
        let (source, descriptor) =
            SourceReader::from_format(&self.request.source_path, format, &self.ledger)?;
        let decoder =
            AudioDecoder::open(&descriptor, config.max_consecutive_decode_errors, &self.ledger)?;

        let encoder_descriptor = codecs::find_encoder_by_name(&config.codec)
            .ok_or_else(|| ConvertError::NoEncoder(config.codec.clone()))?;
        let target = TargetFormat::resolve(
            &descriptor,
            config.target_sample_rate,
            config.default_channels,
        )?;

        let mut sink = SinkWriter::create(
            &self.target_path,
            config.output_format,
            config.remove_partial_output,
            &self.ledger,
        )?;
        sink.add_stream(StreamParams {
            codec: encoder_descriptor.codec,
            sample_rate: target.sample_rate,
            channels: target.channels as u16,
            bits_per_sample: encoder_descriptor.bits_per_sample,
        })?;

        let encoder =
            PcmEncoder::open(encoder_descriptor.codec, target, config.compliance, &self.ledger)?;
        let resampler = Resampler::configure(&descriptor, target, &self.ledger)?;
        let buffers = PipelineBuffers::new(&self.ledger, DEFAULT_POOL_SIZE);

        Ok(OpenedPipeline {
            buffers,
            resampler,
            encoder,
            sink,
            decoder,
            source,
            descriptor,
        })
    }

    fn report(&mut self, progress: f64, observer: &dyn ProgressObserver) {
        self.conversion.progress = progress;
        observer.on_progress(progress);
        self.events.emit_lossy(ConversionEvent::ConversionProgress {
            conversion_id: self.id,
            source_path: self.request.source_path.clone(),
            progress,
            timestamp: Utc::now(),
        });
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(conversion_id = %self.id, from = ?self.state, to = ?next, "Pipeline state change");
        self.state = next;
    }
}
