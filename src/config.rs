use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Recording parameters. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Wall-clock recording limit.
    pub duration_secs: u64,
    /// Target capture rate.
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Stop once the file grows past this many bytes.
    pub max_file_bytes: u64,
    /// Flush and log progress every this many accepted frames.
    pub flush_every_frames: u32,
    /// How long one frame acquisition may block.
    pub frame_timeout_ms: u64,
    /// Attempt acquisition at most once per frame interval.
    pub pace_frames: bool,
    /// Derive the header rate from wall time instead of using `fps` as is.
    pub measure_fps: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            duration_secs: 300,
            fps: 10,
            width: 320,
            height: 240,
            max_file_bytes: 45 * 1024 * 1024,
            flush_every_frames: 50,
            frame_timeout_ms: 1000,
            pace_frames: true,
            measure_fps: true,
        }
    }
}

impl RecordingConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values the muxer cannot represent.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "frame size must be positive, got {}x{}",
                self.width, self.height
            ));
        }
        if self.fps == 0 {
            return Err("fps must be positive".into());
        }
        if self.flush_every_frames == 0 {
            return Err("flush_every_frames must be positive".into());
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// Expected frame count for the full duration, for index pre-allocation.
    pub fn expected_frames(&self) -> usize {
        const MAX_PREALLOC: u64 = 100_000;
        self.duration_secs
            .saturating_mul(self.fps as u64)
            .min(MAX_PREALLOC) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware() {
        let config = RecordingConfig::default();
        assert_eq!(config.duration_secs, 300);
        assert_eq!(config.fps, 10);
        assert_eq!((config.width, config.height), (320, 240));
        assert_eq!(config.max_file_bytes, 45 * 1024 * 1024);
        assert_eq!(config.frame_interval(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.json");
        fs::write(&path, r#"{ "fps": 25, "width": 640, "height": 480 }"#).unwrap();

        let config = RecordingConfig::load(&path).unwrap();
        assert_eq!(config.fps, 25);
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.duration_secs, 300);
        assert!(config.pace_frames);
    }

    #[test]
    fn validation_rejects_zero_values() {
        let mut config = RecordingConfig::default();
        config.fps = 0;
        assert!(config.validate().is_err());

        let mut config = RecordingConfig::default();
        config.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn prealloc_is_capped() {
        let mut config = RecordingConfig::default();
        assert_eq!(config.expected_frames(), 3000);
        config.duration_secs = 1_000_000;
        assert_eq!(config.expected_frames(), 100_000);
        config.duration_secs = u64::MAX;
        config.fps = u32::MAX;
        assert_eq!(config.expected_frames(), 100_000);
    }
}
