//! Source reader: container probing and packet demux
//!
//! Opens an input file, probes its container, picks the audio track to
//! extract and hands out the compressed packets in file order. Packets of
//! other tracks are returned too; the caller skips them.

use crate::codecs::{self, CodecLibrary};
use crate::error::{ConvertError, Result};
use crate::resources::{ResourceGuard, ResourceKind, ResourceLedger};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::Channels;
use symphonia::core::codecs::{CodecParameters, CodecType, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;
use symphonia::core::units::TimeBase;
use tracing::{debug, trace};

/// Duration ticks per second (microseconds)
pub const TICKS_PER_SECOND: u64 = 1_000_000;

/// Convert a timestamp in `time_base` units to ticks
pub fn ts_to_ticks(ts: u64, time_base: TimeBase) -> u64 {
    if time_base.denom == 0 {
        return 0;
    }
    let ticks = ts as u128 * time_base.numer as u128 * TICKS_PER_SECOND as u128
        / time_base.denom as u128;
    ticks.min(u64::MAX as u128) as u64
}

/// Ticks as fractional seconds
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// What the pipeline needs to know about the selected audio track
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Position of the track in the container's track list
    pub audio_stream_index: usize,
    /// Container track id, matched against `Packet::track_id()`
    pub track_id: u32,
    pub codec: CodecType,
    pub sample_format: Option<SampleFormat>,
    pub sample_rate: Option<u32>,
    pub channel_layout: Option<Channels>,
    /// Unit of packet timestamps
    pub time_base: TimeBase,
    /// Total duration in ticks; 0 when unknown
    pub total_duration_ticks: u64,
    pub codec_params: CodecParameters,
}

impl StreamDescriptor {
    /// Channel count when the layout is known
    pub fn channel_count(&self) -> Option<usize> {
        self.channel_layout.map(|c| c.count())
    }

    /// Duration as fractional seconds
    pub fn duration_seconds(&self) -> f64 {
        ticks_to_seconds(self.total_duration_ticks)
    }
}

/// Demuxer for one input file
pub struct SourceReader {
    format: Box<dyn FormatReader>,
    path: PathBuf,
    _guard: ResourceGuard,
}

impl SourceReader {
    /// Open `path`, probe it and select its audio track
    pub fn open(path: &Path, ledger: &ResourceLedger) -> Result<(Self, StreamDescriptor)> {
        let format = Self::probe(path)?;
        Self::from_format(path, format, ledger)
    }

    /// Fail with `NotFound` unless `path` is a regular file
    pub fn ensure_exists(path: &Path) -> Result<()> {
        if path.is_file() {
            Ok(())
        } else {
            Err(ConvertError::NotFound(path.to_path_buf()))
        }
    }

    /// Open `path` and detect its container
    pub fn probe(path: &Path) -> Result<Box<dyn FormatReader>> {
        Self::ensure_exists(path)?;

        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConvertError::NotFound(path.to_path_buf()),
            _ => ConvertError::IoOpenFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = codecs::library()
            .probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| ConvertError::UnsupportedFormat {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(probed.format)
    }

    /// Select the audio track of an already probed container
    pub fn from_format(
        path: &Path,
        format: Box<dyn FormatReader>,
        ledger: &ResourceLedger,
    ) -> Result<(Self, StreamDescriptor)> {
        let library = codecs::library();
        let reader = Self {
            format,
            path: path.to_path_buf(),
            _guard: ledger.acquire(ResourceKind::SourceFormat),
        };

        let tracks = reader.format.tracks();
        let default_id = reader.format.default_track().map(|t| t.id);
        let index = select_audio_track(tracks, default_id, library)
            .ok_or_else(|| ConvertError::NoAudioStream(path.to_path_buf()))?;
        let descriptor = describe_track(tracks, index);

        debug!(
            path = %path.display(),
            track = descriptor.track_id,
            codec = %library.codec_label(descriptor.codec),
            sample_rate = ?descriptor.sample_rate,
            channels = ?descriptor.channel_count(),
            duration_secs = descriptor.duration_seconds(),
            "Source opened"
        );

        Ok((reader, descriptor))
    }

    /// Next packet in file order, `None` at end of stream
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        match self.format.next_packet() {
            Ok(packet) => {
                trace!(track = packet.track_id(), ts = packet.ts(), "Packet read");
                Ok(Some(packet))
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(path = %self.path.display(), "End of stream");
                Ok(None)
            }
            Err(e) => Err(ConvertError::from_symphonia("read packet", &e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pick the audio track to extract
///
/// Candidates are tracks with a known codec. The container's default track
/// wins when it is a candidate; otherwise the candidate carrying the most
/// decodable information is chosen, lowest index first on ties.
pub fn select_audio_track(
    tracks: &[Track],
    default_track_id: Option<u32>,
    library: &CodecLibrary,
) -> Option<usize> {
    let is_candidate = |t: &Track| t.codec_params.codec != CODEC_TYPE_NULL;

    if let Some(id) = default_track_id {
        if let Some(index) = tracks.iter().position(|t| t.id == id && is_candidate(t)) {
            return Some(index);
        }
    }

    let mut best: Option<(usize, u8)> = None;
    for (index, track) in tracks.iter().enumerate() {
        if !is_candidate(track) {
            continue;
        }
        let score = track_score(&track.codec_params, library);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

fn track_score(params: &CodecParameters, library: &CodecLibrary) -> u8 {
    let mut score = 0;
    if library.has_decoder(params.codec) {
        score += 8;
    }
    if params.sample_rate.is_some() {
        score += 4;
    }
    if params.channels.is_some() {
        score += 2;
    }
    if params.n_frames.is_some() {
        score += 1;
    }
    score
}

fn track_time_base(params: &CodecParameters) -> Option<TimeBase> {
    params.time_base.or_else(|| {
        params
            .sample_rate
            .filter(|rate| *rate > 0)
            .map(|rate| TimeBase::new(1, rate))
    })
}

fn track_span_ticks(params: &CodecParameters, time_base: Option<TimeBase>) -> u64 {
    match (params.n_frames, time_base) {
        (Some(frames), Some(tb)) => ts_to_ticks(frames, tb),
        _ => 0,
    }
}

fn describe_track(tracks: &[Track], index: usize) -> StreamDescriptor {
    let track = &tracks[index];
    let params = &track.codec_params;

    // Container span: longest track with an explicit time base
    let container_ticks = tracks
        .iter()
        .map(|t| track_span_ticks(&t.codec_params, t.codec_params.time_base))
        .max()
        .unwrap_or(0);

    let time_base = track_time_base(params);
    let total_duration_ticks = if container_ticks > 0 {
        container_ticks
    } else {
        track_span_ticks(params, time_base)
    };

    StreamDescriptor {
        audio_stream_index: index,
        track_id: track.id,
        codec: params.codec,
        sample_format: params.sample_format,
        sample_rate: params.sample_rate,
        channel_layout: params.channels,
        time_base: time_base.unwrap_or_else(|| TimeBase::new(1, TICKS_PER_SECOND as u32)),
        total_duration_ticks,
        codec_params: params.clone(),
    }
}

/// Container stand-in with a fixed track list and no packets
#[cfg(test)]
pub(crate) mod synthetic {
    use symphonia::core::errors::{Error, Result};
    use symphonia::core::formats::{
        Cue, FormatOptions, FormatReader, Packet, SeekMode, SeekTo, SeekedTo, Track,
    };
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::{Metadata, MetadataLog};

    pub struct TrackListReader {
        tracks: Vec<Track>,
        metadata: MetadataLog,
    }

    impl TrackListReader {
        pub fn new(tracks: Vec<Track>) -> Self {
            Self {
                tracks,
                metadata: MetadataLog::default(),
            }
        }
    }

    impl FormatReader for TrackListReader {
        fn try_new(_source: MediaSourceStream, _options: &FormatOptions) -> Result<Self> {
            Err(Error::Unsupported("track list reader is built directly"))
        }

        fn cues(&self) -> &[Cue] {
            &[]
        }

        fn metadata(&mut self) -> Metadata<'_> {
            self.metadata.metadata()
        }

        fn seek(&mut self, _mode: SeekMode, _to: SeekTo) -> Result<SeekedTo> {
            Err(Error::Unsupported("seek"))
        }

        fn tracks(&self) -> &[Track] {
            &self.tracks
        }

        fn next_packet(&mut self) -> Result<Packet> {
            Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "end of stream",
            )))
        }

        fn into_inner(self: Box<Self>) -> MediaSourceStream {
            let empty = std::io::Cursor::new(Vec::<u8>::new());
            MediaSourceStream::new(Box::new(empty), Default::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_PCM_S16LE};

    fn audio_params(rate: u32) -> CodecParameters {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_PCM_S16LE)
            .with_sample_rate(rate)
            .with_channels(Channels::FRONT_LEFT)
            .with_n_frames(rate as u64 * 2);
        params
    }

    #[test]
    fn test_no_candidate_tracks() {
        let tracks = vec![
            Track::new(0, CodecParameters::new()),
            Track::new(1, CodecParameters::new()),
        ];
        assert_eq!(select_audio_track(&tracks, Some(0), codecs::library()), None);
        assert_eq!(select_audio_track(&[], None, codecs::library()), None);
    }

    #[test]
    fn test_default_track_wins() {
        let mut sparse = CodecParameters::new();
        sparse.for_codec(CODEC_TYPE_FLAC);
        let tracks = vec![Track::new(1, audio_params(16000)), Track::new(2, sparse)];
        assert_eq!(select_audio_track(&tracks, Some(2), codecs::library()), Some(1));
    }

    #[test]
    fn test_best_candidate_without_default() {
        let mut sparse = CodecParameters::new();
        sparse.for_codec(CODEC_TYPE_FLAC);
        let tracks = vec![
            Track::new(1, CodecParameters::new()),
            Track::new(2, sparse),
            Track::new(3, audio_params(16000)),
            Track::new(4, audio_params(44100)),
        ];
        // Tracks 3 and 4 tie; the lower index wins
        assert_eq!(select_audio_track(&tracks, None, codecs::library()), Some(2));
        // A default that is not a candidate is ignored
        assert_eq!(select_audio_track(&tracks, Some(1), codecs::library()), Some(2));
    }

    #[test]
    fn test_duration_falls_back_to_sample_rate_time_base() {
        let tracks = vec![Track::new(1, audio_params(16000))];
        let descriptor = describe_track(&tracks, 0);
        assert_eq!(descriptor.time_base, TimeBase::new(1, 16000));
        assert_eq!(descriptor.total_duration_ticks, 2 * TICKS_PER_SECOND);
        assert_eq!(descriptor.channel_count(), Some(1));
    }

    #[test]
    fn test_duration_uses_longest_track() {
        let mut long = audio_params(8000);
        long.with_time_base(TimeBase::new(1, 8000)).with_n_frames(8000 * 5);
        let mut short = audio_params(16000);
        short.with_time_base(TimeBase::new(1, 16000));
        let tracks = vec![Track::new(1, short), Track::new(2, long)];

        let descriptor = describe_track(&tracks, 0);
        assert_eq!(descriptor.total_duration_ticks, 5 * TICKS_PER_SECOND);
    }

    #[test]
    fn test_ts_to_ticks() {
        assert_eq!(ts_to_ticks(8000, TimeBase::new(1, 16000)), 500_000);
        assert_eq!(ts_to_ticks(3, TimeBase::new(1, 3)), TICKS_PER_SECOND);
        assert_eq!(ticks_to_seconds(1_500_000), 1.5);
    }

    #[test]
    fn test_no_audio_stream_releases_source() {
        let ledger = ResourceLedger::new();
        let format = synthetic::TrackListReader::new(vec![Track::new(7, CodecParameters::new())]);

        let result =
            SourceReader::from_format(Path::new("/videos/silent.mp4"), Box::new(format), &ledger);
        assert!(matches!(result, Err(ConvertError::NoAudioStream(_))));
        assert_eq!(ledger.acquired(ResourceKind::SourceFormat), 1);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_from_format_selects_audio_track() {
        let ledger = ResourceLedger::new();
        let format = synthetic::TrackListReader::new(vec![
            Track::new(1, CodecParameters::new()),
            Track::new(2, audio_params(16000)),
        ]);

        let (mut reader, descriptor) =
            SourceReader::from_format(Path::new("/videos/talk.mp4"), Box::new(format), &ledger)
                .unwrap();
        assert_eq!(descriptor.audio_stream_index, 1);
        assert_eq!(descriptor.track_id, 2);
        assert_eq!(descriptor.sample_rate, Some(16000));
        assert!(reader.read_packet().unwrap().is_none());
        assert_eq!(ledger.outstanding(), 1);

        drop(reader);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_open_missing_file() {
        let ledger = ResourceLedger::new();
        let result = SourceReader::open(Path::new("/nonexistent/clip.mp4"), &ledger);
        assert!(matches!(result, Err(ConvertError::NotFound(_))));
        assert_eq!(ledger.acquired(ResourceKind::SourceFormat), 0);
    }
}
