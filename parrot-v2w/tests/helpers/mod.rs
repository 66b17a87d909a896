//! Test helper modules for parrot-v2w integration tests
//!
//! - audio_generator: deterministic WAV inputs and corrupt files
//! - progress: observers recording every reported value

#![allow(dead_code)]

pub mod audio_generator;
pub mod progress;

pub use audio_generator::{generate_garbage_file, generate_sine_wav, read_wav};
pub use progress::{assert_progress_completed, ProgressRecorder};
