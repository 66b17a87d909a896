//! Presentation-side media file record
//!
//! The conversion worker never touches this record. It publishes
//! [`ConversionEvent`]s and whoever owns a `MediaFile` (typically the UI
//! layer) folds them in with [`MediaFile::apply`].

use crate::events::ConversionEvent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A media file queued for audio extraction, as displayed to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Full path of the media file
    pub file_path: PathBuf,
    /// Display name (file name component)
    pub file_name: String,
    /// Whether a conversion of this file is currently running
    pub is_converting: bool,
    /// Conversion progress, 0.0 - 1.0
    pub progress: f64,
}

impl MediaFile {
    /// Create a record for a file that has not been converted yet
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            file_path,
            file_name,
            is_converting: false,
            progress: 0.0,
        }
    }

    /// Apply a conversion event to this record
    ///
    /// Events for other files and batch-level events are ignored.
    /// Returns `true` if the record changed.
    pub fn apply(&mut self, event: &ConversionEvent) -> bool {
        if event.source_path() != Some(&self.file_path) {
            return false;
        }

        let before = (self.is_converting, self.progress);
        match event {
            ConversionEvent::ConversionStarted { .. } => {
                self.is_converting = true;
                self.progress = 0.0;
            }
            ConversionEvent::ConversionProgress { progress, .. } => {
                self.progress = progress.clamp(0.0, 1.0);
            }
            ConversionEvent::ConversionFinished { .. } => {
                self.is_converting = false;
            }
            ConversionEvent::BatchProgress { .. } | ConversionEvent::BatchFinished { .. } => {}
        }
        before != (self.is_converting, self.progress)
    }
}
