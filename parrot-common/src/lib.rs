//! # Parrot Common Library
//!
//! Shared code for the Parrot audio tooling:
//! - Conversion event types and the broadcast `EventBus`
//! - Presentation-side media file record driven by events
//! - TOML configuration discovery and loading

pub mod config;
pub mod error;
pub mod events;
pub mod media;

pub use error::{Error, Result};
pub use events::{ConversionEvent, EventBus, FinishKind};
pub use media::MediaFile;
