//! Process-wide codec library
//!
//! The decoder registry is built once, on first use, and is read-only for the
//! rest of the process. Conversions only ever borrow it.
//!
//! Encoders are a static table: the extractor only writes uncompressed PCM.

use std::sync::OnceLock;
use symphonia::core::codecs::{
    CodecRegistry, CodecType, CODEC_TYPE_PCM_S16BE, CODEC_TYPE_PCM_S16LE,
};
use symphonia::core::probe::Probe;
use tracing::debug;

/// Shared demux/decode primitives
pub struct CodecLibrary {
    registry: CodecRegistry,
}

/// Get the codec library, initializing it on first call
pub fn library() -> &'static CodecLibrary {
    static LIBRARY: OnceLock<CodecLibrary> = OnceLock::new();
    LIBRARY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::PcmDecoder>();
        registry.register_all::<symphonia::default::codecs::VorbisDecoder>();
        registry.register_all::<symphonia::default::codecs::FlacDecoder>();
        registry.register_all::<symphonia::default::codecs::AdpcmDecoder>();
        registry.register_all::<symphonia::default::codecs::AacDecoder>();
        debug!("Codec library initialized");
        CodecLibrary { registry }
    })
}

impl CodecLibrary {
    /// Decoder registry
    pub fn decoders(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Container probe
    pub fn probe(&self) -> &'static Probe {
        symphonia::default::get_probe()
    }

    /// Whether a decoder is registered for `codec`
    pub fn has_decoder(&self, codec: CodecType) -> bool {
        self.registry.get_codec(codec).is_some()
    }

    /// Printable codec name for diagnostics
    pub fn codec_label(&self, codec: CodecType) -> String {
        if let Some(descriptor) = self.registry.get_codec(codec) {
            return descriptor.short_name.to_string();
        }
        if let Some(encoder) = find_encoder(codec) {
            return encoder.name.to_string();
        }
        format!("{:?}", codec)
    }
}

/// Sample byte order of an encoder's packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// An output encoder known to the extractor
#[derive(Debug)]
pub struct EncoderDescriptor {
    /// Short name used in configuration
    pub name: &'static str,
    /// Codec identifier
    pub codec: CodecType,
    /// Bits per encoded sample
    pub bits_per_sample: u16,
    /// Byte order of encoded samples
    pub byte_order: ByteOrder,
    /// Refused under strict compliance
    pub experimental: bool,
}

/// Available output encoders
pub static ENCODERS: &[EncoderDescriptor] = &[
    EncoderDescriptor {
        name: "pcm_s16le",
        codec: CODEC_TYPE_PCM_S16LE,
        bits_per_sample: 16,
        byte_order: ByteOrder::LittleEndian,
        experimental: false,
    },
    EncoderDescriptor {
        name: "pcm_s16be",
        codec: CODEC_TYPE_PCM_S16BE,
        bits_per_sample: 16,
        byte_order: ByteOrder::BigEndian,
        experimental: true,
    },
];

/// Look up an encoder by codec id
pub fn find_encoder(codec: CodecType) -> Option<&'static EncoderDescriptor> {
    ENCODERS.iter().find(|e| e.codec == codec)
}

/// Look up an encoder by configuration name
pub fn find_encoder_by_name(name: &str) -> Option<&'static EncoderDescriptor> {
    ENCODERS.iter().find(|e| e.name.eq_ignore_ascii_case(name))
}
