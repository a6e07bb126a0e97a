//! facelog-core — Face matching, registration and debounced emotion logging.
//!
//! Detection, embedding and emotion classification are delegated to ONNX
//! models behind the [`Analyzer`] trait; this crate decides who a face is
//! and when a reading is worth persisting.

pub mod alignment;
pub mod analyzer;
pub mod clock;
pub mod debounce;
pub mod detector;
pub mod gallery;
pub mod store;
pub mod tracker;
pub mod types;

pub use analyzer::{Analyzer, AnalyzerError, OnnxAnalyzer};
pub use clock::{Clock, ManualClock, SystemClock, TimestampFormat};
pub use debounce::{DebouncedLogger, LogOutcome};
pub use detector::FaceDetector;
pub use gallery::{Gallery, GalleryError};
pub use store::FaceStore;
pub use tracker::{FrameOutcome, PendingRegistration, RegistrationOutcome, Tracker, TrackerConfig};
pub use types::{
    CosineMatcher, Embedding, EmotionEvent, FaceBox, GalleryEntry, MatchResult, Matcher, Observation,
    Person, PersonId,
};

use std::path::PathBuf;

/// `$XDG_DATA_HOME/facelog`, falling back to `~/.local/share/facelog`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelog")
}

/// Where the detector, embedding and emotion ONNX models are looked up by default.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
