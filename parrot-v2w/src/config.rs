//! Configuration for the audio extractor
//!
//! Two tiers, like the rest of Parrot:
//! 1. **TOML file** (optional): located via `parrot_common::config`
//! 2. **Built-in defaults**: every field has one, an empty file is valid
//!
//! Command-line flags override individual fields after loading.
//!
//! ```toml
//! output_extension = "wav"
//! codec = "pcm_s16le"
//! compliance = "experimental"
//! # target_sample_rate = 16000
//! default_channels = 2
//! max_consecutive_decode_errors = 3
//! remove_partial_output = true
//! event_capacity = 1000
//!
//! [logging]
//! level = "info"
//! ```

use crate::codecs;
use crate::error::{ConvertError, Result};
use crate::sink::ContainerFormat;
use serde::Deserialize;
use std::path::Path;

/// Encoder compliance policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compliance {
    /// Only stable encoders
    Strict,
    /// Experimental encoders are accepted too
    #[default]
    Experimental,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Extractor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Extension used when deriving output paths
    pub output_extension: String,

    /// Force an output container instead of guessing from the extension
    pub output_format: Option<ContainerFormat>,

    /// Output codec name (see `codecs::ENCODERS`)
    pub codec: String,

    /// Whether experimental encoders may be used
    pub compliance: Compliance,

    /// Output sample rate; `None` keeps the source rate
    pub target_sample_rate: Option<u32>,

    /// Channel count used when the source does not report a layout
    pub default_channels: u16,

    /// Corrupt packets tolerated in a row before decoding fails
    pub max_consecutive_decode_errors: usize,

    /// Delete output files of cancelled or failed conversions
    pub remove_partial_output: bool,

    /// EventBus channel capacity
    pub event_capacity: usize,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            output_extension: "wav".to_string(),
            output_format: None,
            codec: "pcm_s16le".to_string(),
            compliance: Compliance::default(),
            target_sample_rate: None,
            default_channels: 2,
            max_consecutive_decode_errors: 3,
            remove_partial_output: true,
            event_capacity: 1000,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ExtractorConfig {
    /// Load configuration following the standard resolution order
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let config: Self =
            parrot_common::config::load_or_default(cli_path, parrot_common::config::CONFIG_ENV_VAR)
                .map_err(|e| ConvertError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no conversion could run with
    pub fn validate(&self) -> Result<()> {
        if self.output_extension.is_empty() || self.output_extension.contains('.') {
            return Err(ConvertError::Config(format!(
                "output_extension must be a bare extension, got {:?}",
                self.output_extension
            )));
        }
        if self.default_channels == 0 {
            return Err(ConvertError::Config(
                "default_channels must be at least 1".to_string(),
            ));
        }
        if self.target_sample_rate == Some(0) {
            return Err(ConvertError::Config(
                "target_sample_rate must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConvertError::Config(
                "event_capacity must be positive".to_string(),
            ));
        }
        if codecs::find_encoder_by_name(&self.codec).is_none() {
            return Err(ConvertError::Config(format!(
                "unknown output codec {:?}",
                self.codec
            )));
        }
        Ok(())
    }
}
