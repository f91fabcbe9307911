pub mod recorder;
pub mod source;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use recorder::{RecordingSummary, StopReason};

/// Create a session recording directory: ~/AviRec/recordings/YYYY-MM-DD_HH-MM-SS/
/// Returns the directory path.
pub fn create_session_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Cannot determine home directory")?;
    let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let dir = home.join("AviRec").join("recordings").join(&timestamp);

    fs::create_dir_all(&dir).map_err(|e| format!("Failed to create session directory: {e}"))?;

    log::info!("Session directory created: {}", dir.display());
    Ok(dir)
}

/// The filename for a new recording: video<unix millis>.avi
pub fn recording_filename() -> String {
    format!("video{}.avi", Utc::now().timestamp_millis())
}

#[derive(Serialize)]
pub struct SessionMetadata {
    pub file: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub stop_reason: StopReason,
    pub video: VideoInfo,
}

#[derive(Serialize)]
pub struct VideoInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub fps: u32,
    pub frames: u32,
    pub size_bytes: u64,
}

impl SessionMetadata {
    pub fn from_summary(summary: &RecordingSummary, width: u32, height: u32, target_fps: u32) -> Self {
        let file = summary
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file,
            start_time: summary.started_at.to_rfc3339(),
            end_time: summary.ended_at.to_rfc3339(),
            duration_seconds: summary.duration.as_secs_f64(),
            stop_reason: summary.stop_reason,
            video: VideoInfo {
                codec: "MJPG".into(),
                width,
                height,
                target_fps,
                fps: summary.fps,
                frames: summary.frames,
                size_bytes: summary.file_size,
            },
        }
    }
}

/// Write session_metadata.json to the session directory.
pub fn write_metadata(dir: &Path, metadata: &SessionMetadata) -> Result<(), String> {
    let path = dir.join("session_metadata.json");
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| format!("Failed to serialize metadata: {e}"))?;
    fs::write(&path, json).map_err(|e| format!("Failed to write metadata: {e}"))?;
    log::info!("Session metadata written: {}", path.display());
    Ok(())
}
