//! PCM encoder
//!
//! Packs interleaved 16-bit frames into byte packets in the selected codec's
//! byte order. Packet timestamps and durations are in samples, time base
//! `1/sample_rate`.

use crate::buffers::BufferPool;
use crate::codecs::{self, ByteOrder, EncoderDescriptor};
use crate::config::Compliance;
use crate::error::{ConvertError, ErrorCode, Result};
use crate::resampler::{FrameSize, PcmFrame, TargetFormat};
use crate::resources::{ResourceGuard, ResourceKind, ResourceLedger};
use std::collections::VecDeque;
use symphonia::core::codecs::CodecType;
use symphonia::core::units::TimeBase;
use tracing::debug;

/// One encoded packet
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    pub pts: u64,
    pub duration: u64,
    pub data: Vec<u8>,
}

pub struct PcmEncoder {
    descriptor: &'static EncoderDescriptor,
    format: TargetFormat,
    queued: VecDeque<EncodedPacket>,
    flushed: bool,
    _guard: ResourceGuard,
}

impl PcmEncoder {
    /// Open an encoder for `codec` producing `format`
    pub fn open(
        codec: CodecType,
        format: TargetFormat,
        compliance: Compliance,
        ledger: &ResourceLedger,
    ) -> Result<Self> {
        let descriptor = codecs::find_encoder(codec)
            .ok_or_else(|| ConvertError::NoEncoder(codecs::library().codec_label(codec)))?;

        if descriptor.experimental && compliance == Compliance::Strict {
            return Err(ConvertError::codec(
                "open encoder",
                ErrorCode::Experimental,
                descriptor.name,
            ));
        }
        if format.sample_rate == 0 || format.channels == 0 || format.channels > u16::MAX as usize
        {
            return Err(ConvertError::codec(
                "open encoder",
                ErrorCode::InvalidArgument,
                format!("{} Hz / {} channels", format.sample_rate, format.channels),
            ));
        }

        debug!(
            encoder = descriptor.name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Encoder opened"
        );

        Ok(Self {
            descriptor,
            format,
            queued: VecDeque::new(),
            flushed: false,
            _guard: ledger.acquire(ResourceKind::EncoderContext),
        })
    }

    pub fn descriptor(&self) -> &'static EncoderDescriptor {
        self.descriptor
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    pub fn time_base(&self) -> TimeBase {
        TimeBase::new(1, self.format.sample_rate)
    }

    /// PCM codecs accept frames of any length
    pub fn frame_size(&self) -> FrameSize {
        FrameSize::Variable
    }

    /// Encode one frame; packets are collected with [`packets`](Self::packets)
    pub fn encode(&mut self, frame: &PcmFrame, pool: &mut BufferPool<u8>) -> Result<()> {
        if self.flushed {
            return Err(ConvertError::codec(
                "encode frame",
                ErrorCode::EndOfStream,
                "encoder already flushed",
            ));
        }
        if frame.sample_rate != self.format.sample_rate || frame.channels != self.format.channels {
            return Err(ConvertError::codec(
                "encode frame",
                ErrorCode::InvalidArgument,
                format!(
                    "frame is {} Hz / {} channels, encoder expects {} Hz / {} channels",
                    frame.sample_rate,
                    frame.channels,
                    self.format.sample_rate,
                    self.format.channels
                ),
            ));
        }

        let mut data = pool.acquire(frame.samples.len() * 2);
        match self.descriptor.byte_order {
            ByteOrder::LittleEndian => {
                for sample in &frame.samples {
                    data.extend_from_slice(&sample.to_le_bytes());
                }
            }
            ByteOrder::BigEndian => {
                for sample in &frame.samples {
                    data.extend_from_slice(&sample.to_be_bytes());
                }
            }
        }

        self.queued.push_back(EncodedPacket {
            pts: frame.pts,
            duration: frame.frames() as u64,
            data,
        });
        Ok(())
    }

    /// Take every packet produced so far
    pub fn packets(&mut self) -> Vec<EncodedPacket> {
        self.queued.drain(..).collect()
    }

    /// Signal end of input and take the remaining packets
    pub fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        if self.flushed {
            return Err(ConvertError::codec(
                "flush encoder",
                ErrorCode::EndOfStream,
                "encoder already flushed",
            ));
        }
        self.flushed = true;
        Ok(self.packets())
    }

    /// Drop buffered packets without emitting them
    pub fn discard(&mut self) {
        self.queued.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::{CODEC_TYPE_FLAC, CODEC_TYPE_PCM_S16BE, CODEC_TYPE_PCM_S16LE};

    const MONO_16K: TargetFormat = TargetFormat {
        sample_rate: 16000,
        channels: 1,
    };

    fn frame(pts: u64, samples: Vec<i16>) -> PcmFrame {
        PcmFrame {
            pts,
            sample_rate: 16000,
            channels: 1,
            samples,
        }
    }

    #[test]
    fn test_encode_little_endian() {
        let ledger = ResourceLedger::new();
        let mut pool = BufferPool::new(4);
        let mut encoder =
            PcmEncoder::open(CODEC_TYPE_PCM_S16LE, MONO_16K, Compliance::Strict, &ledger).unwrap();

        encoder.encode(&frame(0, vec![1, -2]), &mut pool).unwrap();
        encoder.encode(&frame(2, vec![0x0102]), &mut pool).unwrap();
        let packets = encoder.packets();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data, vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(packets[0].duration, 2);
        assert_eq!(packets[1].pts, 2);
        assert_eq!(packets[1].data, vec![0x02, 0x01]);
    }

    #[test]
    fn test_strict_compliance_refuses_experimental() {
        let ledger = ResourceLedger::new();
        let result = PcmEncoder::open(CODEC_TYPE_PCM_S16BE, MONO_16K, Compliance::Strict, &ledger);
        let err = result.err().unwrap();
        assert_eq!(err.code(), Some(ErrorCode::Experimental));
        assert_eq!(ledger.acquired(ResourceKind::EncoderContext), 0);

        let mut encoder =
            PcmEncoder::open(CODEC_TYPE_PCM_S16BE, MONO_16K, Compliance::Experimental, &ledger)
                .unwrap();
        let mut pool = BufferPool::new(4);
        encoder.encode(&frame(0, vec![0x0102]), &mut pool).unwrap();
        assert_eq!(encoder.packets()[0].data, vec![0x01, 0x02]);
    }

    #[test]
    fn test_unknown_codec() {
        let ledger = ResourceLedger::new();
        let result = PcmEncoder::open(CODEC_TYPE_FLAC, MONO_16K, Compliance::Experimental, &ledger);
        assert!(matches!(result, Err(ConvertError::NoEncoder(_))));
    }

    #[test]
    fn test_rejects_mismatched_frame() {
        let ledger = ResourceLedger::new();
        let mut pool = BufferPool::new(4);
        let mut encoder =
            PcmEncoder::open(CODEC_TYPE_PCM_S16LE, MONO_16K, Compliance::Strict, &ledger).unwrap();

        let stereo = PcmFrame {
            pts: 0,
            sample_rate: 16000,
            channels: 2,
            samples: vec![0; 4],
        };
        let err = encoder.encode(&stereo, &mut pool).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgument));
    }

    #[test]
    fn test_flush_once() {
        let ledger = ResourceLedger::new();
        let mut pool = BufferPool::new(4);
        let mut encoder =
            PcmEncoder::open(CODEC_TYPE_PCM_S16LE, MONO_16K, Compliance::Strict, &ledger).unwrap();

        encoder.encode(&frame(0, vec![7; 8]), &mut pool).unwrap();
        assert_eq!(encoder.flush().unwrap().len(), 1);

        let err = encoder.encode(&frame(8, vec![7; 8]), &mut pool).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EndOfStream));
        assert_eq!(encoder.flush().unwrap_err().code(), Some(ErrorCode::EndOfStream));
    }

    #[test]
    fn test_discard() {
        let ledger = ResourceLedger::new();
        let mut pool = BufferPool::new(4);
        let mut encoder =
            PcmEncoder::open(CODEC_TYPE_PCM_S16LE, MONO_16K, Compliance::Strict, &ledger).unwrap();
        encoder.encode(&frame(0, vec![1; 4]), &mut pool).unwrap();
        encoder.discard();
        assert!(encoder.packets().is_empty());
    }
}
