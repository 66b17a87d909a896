//! Audio test file generation utilities
//!
//! Generates sine-wave WAV files with known characteristics, so a
//! conversion can be checked sample for sample.

use hound::{WavReader, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Generate a sine wave WAV file
///
/// Every channel carries the same signal.
///
/// # Arguments
/// * `path` - Output file path
/// * `duration_ms` - Duration in milliseconds
/// * `sample_rate` - Sample rate in Hz
/// * `channels` - Channel count
/// * `frequency_hz` - Sine frequency in Hz
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    duration_ms: u64,
    sample_rate: u32,
    channels: u16,
    frequency_hz: f32,
) -> Result<u64, hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = (sample_rate as u64 * duration_ms) / 1000;
    let amplitude = 0.5 * i16::MAX as f32;

    for frame_idx in 0..total_frames {
        let t = frame_idx as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * amplitude) as i16;
        for _ in 0..channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(total_frames)
}

/// Write bytes no container probe recognizes
pub fn generate_garbage_file<P: AsRef<Path>>(path: P, len: usize) -> std::io::Result<()> {
    // Deterministic 7-bit LCG noise: no 0xFF sync bytes, so nothing looks
    // like an MPEG or ADTS frame header
    let mut state: u32 = 0x1234_5678;
    let bytes: Vec<u8> = (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 25) as u8
        })
        .collect();
    std::fs::write(path, bytes)
}

/// Read a WAV file completely
pub fn read_wav<P: AsRef<Path>>(path: P) -> (WavSpec, Vec<i16>) {
    let reader = WavReader::open(path).expect("Failed to open WAV");
    let spec = reader.spec();
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .expect("Failed to read samples");
    (spec, samples)
}
