//! Sample format, layout and rate conversion
//!
//! Decoded buffers of any symphonia sample format become interleaved 16-bit
//! PCM in the target layout. When the target rate differs from the source
//! rate, a rubato `FastFixedIn` converter runs in between, on planar f32.
//!
//! Channel mapping:
//! - same count: identity
//! - fewer source channels: output channel `i` takes source `i % N`
//! - more source channels: source `j` is averaged into output `j % M`

use crate::buffers::BufferPool;
use crate::error::{ConvertError, ErrorCode, Result};
use crate::resources::{ResourceGuard, ResourceKind, ResourceLedger};
use crate::source::StreamDescriptor;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use std::collections::VecDeque;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::FromSample;
use symphonia::core::sample::Sample;
use tracing::debug;

/// Input frames per rubato chunk
const RATE_CHUNK_FRAMES: usize = 1024;

/// Flush calls allowed to reach the expected output length
const MAX_FLUSH_ROUNDS: usize = 16;

/// How many frames an output frame must hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// Exactly this many frames, except the last one after drain
    Fixed(usize),
    /// Whatever is available
    Variable,
}

/// Output PCM parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

impl TargetFormat {
    /// Derive the target from the source stream
    ///
    /// The rate is `target_rate` when set, otherwise the source rate. The
    /// layout is the source layout when known, otherwise `default_channels`.
    pub fn resolve(
        descriptor: &StreamDescriptor,
        target_rate: Option<u32>,
        default_channels: u16,
    ) -> Result<Self> {
        let sample_rate = target_rate
            .or(descriptor.sample_rate)
            .filter(|r| *r > 0)
            .ok_or_else(|| {
                ConvertError::AllocationFailed("source sample rate unknown".to_string())
            })?;
        let channels = descriptor
            .channel_count()
            .filter(|c| *c > 0)
            .unwrap_or(default_channels as usize);
        if channels == 0 {
            return Err(ConvertError::AllocationFailed(
                "target channel count is zero".to_string(),
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }
}

/// Interleaved 16-bit PCM frame
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    /// Timestamp in samples of `sample_rate`
    pub pts: u64,
    pub sample_rate: u32,
    pub channels: usize,
    pub samples: Vec<i16>,
}

impl PcmFrame {
    /// Samples per channel
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

/// Streaming rate conversion on planar f32
struct RateConverter {
    inner: FastFixedIn<f32>,
    ratio: f64,
    /// Planar input waiting for a full chunk
    queued: Vec<Vec<f32>>,
    /// Leading output frames still to drop
    delay: usize,
    frames_in: u64,
    frames_out: u64,
}

impl RateConverter {
    fn new(source_rate: u32, target_rate: u32, channels: usize) -> Result<Self> {
        let ratio = target_rate as f64 / source_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            RATE_CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| ConvertError::codec("init resampler", ErrorCode::Resample, e))?;
        let delay = inner.output_delay();
        Ok(Self {
            inner,
            ratio,
            queued: vec![Vec::new(); channels],
            delay,
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn push(&mut self, planes: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        self.frames_in += planes.first().map_or(0, |p| p.len()) as u64;
        for (queue, plane) in self.queued.iter_mut().zip(planes) {
            queue.extend(plane);
        }

        let mut out = vec![Vec::new(); self.queued.len()];
        loop {
            let needed = self.inner.input_frames_next();
            if self.queued[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .queued
                .iter_mut()
                .map(|q| q.drain(..needed).collect())
                .collect();
            let produced = self
                .inner
                .process(&chunk, None)
                .map_err(|e| ConvertError::codec("resample", ErrorCode::Resample, e))?;
            self.emit(produced, &mut out, None);
        }
        Ok(out)
    }

    /// Convert whatever is queued and trim to `round(frames_in * ratio)`
    fn flush(&mut self) -> Result<Vec<Vec<f32>>> {
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let mut out = vec![Vec::new(); self.queued.len()];

        if !self.queued[0].is_empty() {
            let rest = std::mem::replace(&mut self.queued, vec![Vec::new(); out.len()]);
            let produced = self
                .inner
                .process_partial(Some(rest.as_slice()), None)
                .map_err(|e| ConvertError::codec("resample", ErrorCode::Resample, e))?;
            self.emit(produced, &mut out, Some(expected));
        }

        let mut rounds = 0;
        while self.frames_out < expected && rounds < MAX_FLUSH_ROUNDS {
            let produced = self
                .inner
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| ConvertError::codec("resample", ErrorCode::Resample, e))?;
            self.emit(produced, &mut out, Some(expected));
            rounds += 1;
        }
        Ok(out)
    }

    fn emit(&mut self, produced: Vec<Vec<f32>>, out: &mut [Vec<f32>], limit: Option<u64>) {
        let frames = produced.first().map_or(0, |p| p.len());
        let skip = self.delay.min(frames);
        self.delay -= skip;

        let mut take = frames - skip;
        if let Some(limit) = limit {
            take = take.min(limit.saturating_sub(self.frames_out) as usize);
        }
        for (dst, src) in out.iter_mut().zip(&produced) {
            dst.extend_from_slice(&src[skip..skip + take]);
        }
        self.frames_out += take as u64;
    }

    fn discard(&mut self) {
        for queue in &mut self.queued {
            queue.clear();
        }
    }
}

/// Converts decoded buffers into target-format PCM frames
pub struct Resampler {
    source_rate: u32,
    target: TargetFormat,
    rate: Option<RateConverter>,
    /// Interleaved output waiting to be pulled
    pending: VecDeque<i16>,
    /// Timestamp of the next output frame, in target samples
    next_pts: u64,
    _guard: ResourceGuard,
}

impl Resampler {
    /// Set up conversion from the source stream to `target`
    pub fn configure(
        descriptor: &StreamDescriptor,
        target: TargetFormat,
        ledger: &ResourceLedger,
    ) -> Result<Self> {
        let source_rate = descriptor
            .sample_rate
            .filter(|r| *r > 0)
            .ok_or_else(|| {
                ConvertError::AllocationFailed("source sample rate unknown".to_string())
            })?;
        if target.sample_rate == 0 || target.channels == 0 {
            return Err(ConvertError::AllocationFailed(format!(
                "invalid target format {} Hz / {} channels",
                target.sample_rate, target.channels
            )));
        }

        let rate = if source_rate != target.sample_rate {
            Some(RateConverter::new(
                source_rate,
                target.sample_rate,
                target.channels,
            )?)
        } else {
            None
        };

        debug!(
            source_rate,
            source_channels = ?descriptor.channel_count(),
            target_rate = target.sample_rate,
            target_channels = target.channels,
            rate_conversion = rate.is_some(),
            "Resampler configured"
        );

        Ok(Self {
            source_rate,
            target,
            rate,
            pending: VecDeque::new(),
            next_pts: 0,
            _guard: ledger.acquire(ResourceKind::Resampler),
        })
    }

    pub fn target(&self) -> TargetFormat {
        self.target
    }

    /// Queue a decoded buffer
    pub fn push(&mut self, buffer: &AudioBufferRef<'_>) -> Result<()> {
        let rate = buffer.spec().rate;
        if rate != self.source_rate {
            return Err(ConvertError::codec(
                "convert samples",
                ErrorCode::InvalidArgument,
                format!("sample rate changed from {} to {}", self.source_rate, rate),
            ));
        }

        let planes = map_channels_ref(buffer, self.target.channels);
        match self.rate.as_mut() {
            Some(converter) => {
                let converted = converter.push(planes)?;
                self.enqueue(&converted);
            }
            None => self.enqueue(&planes),
        }
        Ok(())
    }

    /// Take ready output frames
    pub fn pull(&mut self, frame_size: FrameSize, pool: &mut BufferPool<i16>) -> Vec<PcmFrame> {
        let channels = self.target.channels;
        let mut frames = Vec::new();
        match frame_size {
            FrameSize::Fixed(size) => {
                let chunk = size.max(1) * channels;
                while self.pending.len() >= chunk {
                    frames.push(self.take(chunk, pool));
                }
            }
            FrameSize::Variable => {
                if !self.pending.is_empty() {
                    let len = self.pending.len();
                    frames.push(self.take(len, pool));
                }
            }
        }
        frames
    }

    /// `push` followed by `pull`
    pub fn convert(
        &mut self,
        buffer: &AudioBufferRef<'_>,
        frame_size: FrameSize,
        pool: &mut BufferPool<i16>,
    ) -> Result<Vec<PcmFrame>> {
        self.push(buffer)?;
        Ok(self.pull(frame_size, pool))
    }

    /// Flush buffered samples at end of input
    ///
    /// With a fixed frame size, the last frame may be short.
    pub fn drain(
        &mut self,
        frame_size: FrameSize,
        pool: &mut BufferPool<i16>,
    ) -> Result<Vec<PcmFrame>> {
        if let Some(converter) = self.rate.as_mut() {
            let converted = converter.flush()?;
            self.enqueue(&converted);
        }
        let mut frames = self.pull(frame_size, pool);
        if !self.pending.is_empty() {
            let len = self.pending.len();
            frames.push(self.take(len, pool));
        }
        Ok(frames)
    }

    /// Drop buffered samples without converting them
    pub fn discard(&mut self) {
        self.pending.clear();
        if let Some(converter) = self.rate.as_mut() {
            converter.discard();
        }
    }

    fn enqueue(&mut self, planes: &[Vec<f32>]) {
        let frames = planes.first().map_or(0, |p| p.len());
        self.pending.reserve(frames * planes.len());
        for i in 0..frames {
            for plane in planes {
                self.pending.push_back(f32_to_i16(plane[i]));
            }
        }
    }

    fn take(&mut self, len: usize, pool: &mut BufferPool<i16>) -> PcmFrame {
        let mut samples = pool.acquire(len);
        samples.extend(self.pending.drain(..len));
        let frame = PcmFrame {
            pts: self.next_pts,
            sample_rate: self.target.sample_rate,
            channels: self.target.channels,
            samples,
        };
        self.next_pts += frame.frames() as u64;
        frame
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

fn map_channels_ref(buffer: &AudioBufferRef<'_>, out_channels: usize) -> Vec<Vec<f32>> {
    match buffer {
        AudioBufferRef::U8(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::U16(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::U24(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::U32(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::S8(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::S16(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::S24(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::S32(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::F32(buf) => map_channels(&**buf, out_channels),
        AudioBufferRef::F64(buf) => map_channels(&**buf, out_channels),
    }
}

fn map_channels<S>(buffer: &AudioBuffer<S>, out_channels: usize) -> Vec<Vec<f32>>
where
    S: Sample,
    f32: FromSample<S>,
{
    let in_channels = buffer.spec().channels.count();
    let frames = buffer.frames();
    let mut planes = vec![vec![0.0f32; frames]; out_channels];
    if in_channels == 0 {
        return planes;
    }

    if in_channels <= out_channels {
        for (i, plane) in planes.iter_mut().enumerate() {
            for (dst, src) in plane.iter_mut().zip(buffer.chan(i % in_channels)) {
                *dst = f32::from_sample(*src);
            }
        }
    } else {
        let mut counts = vec![0usize; out_channels];
        for j in 0..in_channels {
            counts[j % out_channels] += 1;
            let plane = &mut planes[j % out_channels];
            for (dst, src) in plane.iter_mut().zip(buffer.chan(j)) {
                *dst += f32::from_sample(*src);
            }
        }
        for (plane, count) in planes.iter_mut().zip(counts) {
            let scale = 1.0 / count as f32;
            for sample in plane.iter_mut() {
                *sample *= scale;
            }
        }
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::{AsAudioBufferRef, Channels, SignalSpec};
    use symphonia::core::codecs::{CodecParameters, CODEC_TYPE_PCM_S16LE};
    use symphonia::core::units::TimeBase;

    fn descriptor(rate: u32, channels: Option<Channels>) -> StreamDescriptor {
        StreamDescriptor {
            audio_stream_index: 0,
            track_id: 0,
            codec: CODEC_TYPE_PCM_S16LE,
            sample_format: None,
            sample_rate: Some(rate),
            channel_layout: channels,
            time_base: TimeBase::new(1, rate),
            total_duration_ticks: 0,
            codec_params: CodecParameters::new(),
        }
    }

    fn s16_buffer(rate: u32, channels: Channels, planes: &[Vec<i16>]) -> AudioBuffer<i16> {
        let frames = planes[0].len();
        let mut buffer = AudioBuffer::<i16>::new(frames as u64, SignalSpec::new(rate, channels));
        buffer.render_reserved(Some(frames));
        for (ch, plane) in planes.iter().enumerate() {
            buffer.chan_mut(ch).copy_from_slice(plane);
        }
        buffer
    }

    #[test]
    fn test_target_defaults_to_source() {
        let target =
            TargetFormat::resolve(&descriptor(16000, Some(Channels::FRONT_LEFT)), None, 2).unwrap();
        assert_eq!(
            target,
            TargetFormat {
                sample_rate: 16000,
                channels: 1
            }
        );

        let target = TargetFormat::resolve(&descriptor(44100, None), Some(8000), 2).unwrap();
        assert_eq!(target.sample_rate, 8000);
        assert_eq!(target.channels, 2);
    }

    #[test]
    fn test_identity_is_lossless() {
        let ledger = ResourceLedger::new();
        let source = descriptor(16000, Some(Channels::FRONT_LEFT));
        let target = TargetFormat::resolve(&source, None, 2).unwrap();
        let mut resampler = Resampler::configure(&source, target, &ledger).unwrap();
        let mut pool = BufferPool::new(4);

        let input: Vec<i16> = vec![i16::MIN, -1234, 0, 1, 1234, i16::MAX];
        let buffer = s16_buffer(16000, Channels::FRONT_LEFT, &[input.clone()]);
        let frames = resampler
            .convert(&buffer.as_audio_buffer_ref(), FrameSize::Variable, &mut pool)
            .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, input);
        assert_eq!(frames[0].pts, 0);
    }

    #[test]
    fn test_upmix_mono_to_stereo() {
        let ledger = ResourceLedger::new();
        let source = descriptor(16000, None);
        let target = TargetFormat::resolve(&source, None, 2).unwrap();
        let mut resampler = Resampler::configure(&source, target, &ledger).unwrap();
        let mut pool = BufferPool::new(4);

        let buffer = s16_buffer(16000, Channels::FRONT_LEFT, &[vec![100, 200, 300]]);
        let frames = resampler
            .convert(&buffer.as_audio_buffer_ref(), FrameSize::Variable, &mut pool)
            .unwrap();
        assert_eq!(frames[0].samples, vec![100, 100, 200, 200, 300, 300]);
        assert_eq!(frames[0].frames(), 3);
    }

    #[test]
    fn test_downmix_averages() {
        let ledger = ResourceLedger::new();
        let source = descriptor(16000, Some(Channels::FRONT_LEFT));
        let target = TargetFormat::resolve(&source, None, 2).unwrap();
        let mut resampler = Resampler::configure(&source, target, &ledger).unwrap();
        let mut pool = BufferPool::new(4);

        let buffer = s16_buffer(
            16000,
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
            &[vec![1000, -2000], vec![3000, 2000]],
        );
        let frames = resampler
            .convert(&buffer.as_audio_buffer_ref(), FrameSize::Variable, &mut pool)
            .unwrap();
        assert_eq!(frames[0].samples, vec![2000, 0]);
    }

    #[test]
    fn test_fixed_frames_hold_back_remainder() {
        let ledger = ResourceLedger::new();
        let source = descriptor(16000, Some(Channels::FRONT_LEFT));
        let target = TargetFormat::resolve(&source, None, 2).unwrap();
        let mut resampler = Resampler::configure(&source, target, &ledger).unwrap();
        let mut pool = BufferPool::new(4);

        let buffer = s16_buffer(16000, Channels::FRONT_LEFT, &[(0..10).collect()]);
        let frames = resampler
            .convert(&buffer.as_audio_buffer_ref(), FrameSize::Fixed(4), &mut pool)
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].pts, 4);

        let rest = resampler.drain(FrameSize::Fixed(4), &mut pool).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].samples, vec![8, 9]);
        assert_eq!(rest[0].pts, 8);
    }

    #[test]
    fn test_rate_conversion_halves_frame_count() {
        let ledger = ResourceLedger::new();
        let source = descriptor(16000, Some(Channels::FRONT_LEFT));
        let target = TargetFormat::resolve(&source, Some(8000), 2).unwrap();
        let mut resampler = Resampler::configure(&source, target, &ledger).unwrap();
        let mut pool = BufferPool::new(4);

        let mut produced = 0;
        for block in 0..16 {
            let samples: Vec<i16> = (0..1000)
                .map(|i| {
                    let t = (block * 1000 + i) as f32 / 16000.0;
                    ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16
                })
                .collect();
            let buffer = s16_buffer(16000, Channels::FRONT_LEFT, &[samples]);
            produced += resampler
                .convert(&buffer.as_audio_buffer_ref(), FrameSize::Variable, &mut pool)
                .unwrap()
                .iter()
                .map(PcmFrame::frames)
                .sum::<usize>();
        }
        produced += resampler
            .drain(FrameSize::Variable, &mut pool)
            .unwrap()
            .iter()
            .map(PcmFrame::frames)
            .sum::<usize>();

        assert!((produced as i64 - 8000).abs() <= 2, "produced {}", produced);
    }

    #[test]
    fn test_discard_drops_pending() {
        let ledger = ResourceLedger::new();
        let source = descriptor(16000, Some(Channels::FRONT_LEFT));
        let target = TargetFormat::resolve(&source, None, 2).unwrap();
        let mut resampler = Resampler::configure(&source, target, &ledger).unwrap();
        let mut pool = BufferPool::new(4);

        let buffer = s16_buffer(16000, Channels::FRONT_LEFT, &[(0..10).collect()]);
        resampler.push(&buffer.as_audio_buffer_ref()).unwrap();
        resampler.discard();
        assert!(resampler.drain(FrameSize::Variable, &mut pool).unwrap().is_empty());

        drop(resampler);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_rate_change_rejected() {
        let ledger = ResourceLedger::new();
        let source = descriptor(16000, Some(Channels::FRONT_LEFT));
        let target = TargetFormat::resolve(&source, None, 2).unwrap();
        let mut resampler = Resampler::configure(&source, target, &ledger).unwrap();

        let buffer = s16_buffer(22050, Channels::FRONT_LEFT, &[vec![0; 4]]);
        let err = resampler.push(&buffer.as_audio_buffer_ref()).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    }
}
