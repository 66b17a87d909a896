//! Packet decoder
//!
//! Turns compressed packets of the selected track into decoded audio
//! buffers. A corrupt packet is skipped with a warning; a run of them longer
//! than the configured limit is fatal, as is every other decoder error.

use crate::codecs;
use crate::error::{ConvertError, ErrorCode, Result};
use crate::resources::{ResourceGuard, ResourceKind, ResourceLedger};
use crate::source::StreamDescriptor;
use symphonia::core::audio::AudioBufferRef;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use tracing::{debug, trace, warn};

/// A decoded buffer and its timestamp in the stream time base
pub struct DecodedFrame<'a> {
    pub pts: u64,
    pub buffer: AudioBufferRef<'a>,
}

/// Decoder for one audio track
pub struct AudioDecoder {
    decoder: Box<dyn Decoder>,
    track_id: u32,
    consecutive_errors: usize,
    max_consecutive_errors: usize,
    skipped_packets: u64,
    _guard: ResourceGuard,
}

impl AudioDecoder {
    /// Open a decoder for the selected track
    pub fn open(
        descriptor: &StreamDescriptor,
        max_consecutive_errors: usize,
        ledger: &ResourceLedger,
    ) -> Result<Self> {
        let library = codecs::library();
        if !library.has_decoder(descriptor.codec) {
            return Err(ConvertError::NoDecoder(library.codec_label(descriptor.codec)));
        }

        let decoder = library
            .decoders()
            .make(&descriptor.codec_params, &DecoderOptions::default())
            .map_err(|e| ConvertError::from_symphonia("open decoder", &e))?;

        debug!(
            track = descriptor.track_id,
            codec = %library.codec_label(descriptor.codec),
            "Decoder opened"
        );

        Ok(Self {
            decoder,
            track_id: descriptor.track_id,
            consecutive_errors: 0,
            max_consecutive_errors,
            skipped_packets: 0,
            _guard: ledger.acquire(ResourceKind::DecoderContext),
        })
    }

    /// Decode one packet
    ///
    /// Returns `None` when the packet yields no samples, including skipped
    /// corrupt packets.
    pub fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedFrame<'_>>> {
        match self.decoder.decode(packet) {
            Ok(buffer) => {
                self.consecutive_errors = 0;
                if buffer.frames() == 0 {
                    return Ok(None);
                }
                trace!(ts = packet.ts(), frames = buffer.frames(), "Packet decoded");
                Ok(Some(DecodedFrame {
                    pts: packet.ts(),
                    buffer,
                }))
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > self.max_consecutive_errors {
                    return Err(ConvertError::codec(
                        "decode packet",
                        ErrorCode::InvalidData,
                        format!("{} ({} corrupt packets in a row)", msg, self.consecutive_errors),
                    ));
                }
                self.skipped_packets += 1;
                warn!(ts = packet.ts(), error = msg, "Skipping corrupt packet");
                Ok(None)
            }
            Err(e) => Err(ConvertError::from_symphonia("decode packet", &e)),
        }
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    /// Corrupt packets skipped so far
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets
    }
}
