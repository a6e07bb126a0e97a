use facelog_core::debounce::{cooldown_from_secs, DEFAULT_COOLDOWN_SECS};
use facelog_core::types::DEFAULT_SIMILARITY_THRESHOLD;
use facelog_core::{TimestampFormat, TrackerConfig};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD face detector, relative to `model_dir`.
    pub detector_model: String,
    pub embedding_model: String,
    pub emotion_model: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity threshold for a positive match (inclusive).
    pub similarity_threshold: f32,
    /// Minimum seconds between two events for the same person.
    pub debounce_secs: f64,
    pub timestamp_format: TimestampFormat,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `FACELOG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACELOG_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facelog_core::default_model_dir());

        let db_path = std::env::var("FACELOG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facelog_store::default_db_path());

        Self {
            camera_device: std::env::var("FACELOG_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_width: env_u32("FACELOG_CAPTURE_WIDTH", 640),
            capture_height: env_u32("FACELOG_CAPTURE_HEIGHT", 480),
            model_dir,
            detector_model: std::env::var("FACELOG_DETECTOR_MODEL")
                .unwrap_or_else(|_| "det_10g.onnx".to_string()),
            embedding_model: std::env::var("FACELOG_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "embedding.onnx".to_string()),
            emotion_model: std::env::var("FACELOG_EMOTION_MODEL")
                .unwrap_or_else(|_| "emotion-ferplus-8.onnx".to_string()),
            db_path,
            similarity_threshold: env_f32(
                "FACELOG_SIMILARITY_THRESHOLD",
                DEFAULT_SIMILARITY_THRESHOLD,
            ),
            debounce_secs: env_f64("FACELOG_DEBOUNCE_SECS", DEFAULT_COOLDOWN_SECS),
            timestamp_format: timestamp_format(std::env::var("FACELOG_UTC_OFFSET").ok()),
            warmup_frames: env_usize("FACELOG_WARMUP_FRAMES", 4),
        }
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn embedding_model_path(&self) -> String {
        self.model_dir
            .join(&self.embedding_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn emotion_model_path(&self) -> String {
        self.model_dir
            .join(&self.emotion_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            similarity_threshold: self.similarity_threshold,
            cooldown: cooldown_from_secs(self.debounce_secs),
            timestamp_format: self.timestamp_format,
        }
    }
}

/// An unset or empty offset means host local time; an unparseable one is
/// reported and also falls back to local time.
fn timestamp_format(offset: Option<String>) -> TimestampFormat {
    match offset.as_deref().map(str::trim) {
        None | Some("") => TimestampFormat::Local,
        Some(raw) => TimestampFormat::from_offset_str(raw).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring FACELOG_UTC_OFFSET; using local time");
            TimestampFormat::Local
        }),
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_timestamp_format_from_offset() {
        assert_eq!(timestamp_format(None), TimestampFormat::Local);
        assert_eq!(timestamp_format(Some("  ".into())), TimestampFormat::Local);
        assert_eq!(
            timestamp_format(Some("+05:30".into())),
            TimestampFormat::Fixed(FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap())
        );
        assert_eq!(
            timestamp_format(Some("not-an-offset".into())),
            TimestampFormat::Local
        );
    }
}
