use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::source::{Acquired, FrameSource};
use crate::avi::header::HEADER_SIZE;
use crate::avi::writer::AviWriter;
use crate::config::RecordingConfig;

/// BufWriter capacity for the recording file.
const BUF_WRITER_SIZE: usize = 64 * 1024;

/// Session failures surfaced to the caller. No usable file exists afterwards.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Failed to open {} for writing: {source}", path.display())]
    SinkOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No frames captured")]
    NoFrames,
    #[error("File too small to finalize ({size} bytes)")]
    TooSmallToFinalize { size: u64 },
    #[error("Muxer error: {0}")]
    Mux(String),
}

impl From<String> for RecordError {
    fn from(e: String) -> Self {
        RecordError::Mux(e)
    }
}

/// Why the capture loop ended. All of these still finalize the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    DurationElapsed,
    StopRequested,
    SizeCeiling,
    SourceExhausted,
}

/// Outcome of a successfully finalized session.
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u32,
    pub duration: Duration,
    /// Rate written into the header.
    pub fps: u32,
    pub file_size: u64,
    pub stop_reason: StopReason,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Record frames from `source` into an MJPEG AVI at `path`.
///
/// Runs until the configured duration elapses, `stop` is set, the size
/// ceiling is crossed, or the source runs dry; then writes the index and
/// patches the header. Any failure after the file is created, including a
/// session with no accepted frames, removes the file.
pub fn record<S: FrameSource>(
    source: &mut S,
    path: &Path,
    config: &RecordingConfig,
    stop: &AtomicBool,
) -> Result<RecordingSummary, RecordError> {
    if path.exists() {
        let _ = fs::remove_file(path);
    }

    let file = File::create(path).map_err(|e| RecordError::SinkOpen {
        path: path.to_path_buf(),
        source: e,
    })?;
    let writer = BufWriter::with_capacity(BUF_WRITER_SIZE, file);

    // The sink is dropped inside record_to, so the file is closed before removal
    record_to(source, writer, path, config, stop).inspect_err(|_| discard(path))
}

/// The capture loop and finalize over any seekable sink. `path` only labels
/// the summary and log lines.
fn record_to<S: FrameSource, W: Write + Seek>(
    source: &mut S,
    sink: W,
    path: &Path,
    config: &RecordingConfig,
    stop: &AtomicBool,
) -> Result<RecordingSummary, RecordError> {
    let mut muxer = AviWriter::new(sink, config.width, config.height, config.fps)?;
    muxer.reserve_frames(config.expected_frames());

    log::info!(
        "Recording {} ({}x{} @ {} fps, up to {} s)",
        path.display(),
        config.width,
        config.height,
        config.fps,
        config.duration_secs
    );

    let started_at = Utc::now();
    let start = Instant::now();
    let limit = Duration::from_secs(config.duration_secs);
    let interval = config.frame_interval();
    let mut last_attempt: Option<Instant> = None;
    let mut last_frame_len = 0usize;

    let stop_reason = loop {
        if stop.load(Ordering::Relaxed) {
            break StopReason::StopRequested;
        }
        if start.elapsed() >= limit {
            break StopReason::DurationElapsed;
        }

        if config.pace_frames {
            if let Some(prev) = last_attempt {
                let since = prev.elapsed();
                if since < interval {
                    thread::sleep(interval - since);
                    continue;
                }
            }
            last_attempt = Some(Instant::now());
        }

        let frame = match source.next_frame(config.frame_timeout()) {
            Acquired::Frame(frame) => frame,
            Acquired::Timeout => {
                log::debug!("No frame within {} ms", config.frame_timeout_ms);
                continue;
            }
            Acquired::Finished => break StopReason::SourceExhausted,
        };

        if muxer.append_frame(&frame)?.is_none() {
            log::debug!("Bad frame, skipping");
            continue;
        }
        last_frame_len = frame.len();

        if muxer.bytes_written() > config.max_file_bytes {
            log::warn!(
                "Stopping: max file size reached ({} bytes)",
                muxer.bytes_written()
            );
            break StopReason::SizeCeiling;
        }

        if muxer.frame_count() % config.flush_every_frames.max(1) == 0 {
            muxer.flush()?;
            log::info!(
                "Rec: {} frames | {} s | {:.2} MB | last frame {} B",
                muxer.frame_count(),
                start.elapsed().as_secs(),
                mib(muxer.bytes_written()),
                last_frame_len
            );
        }
    };

    let duration = start.elapsed();
    log::info!(
        "Capture loop ended ({stop_reason:?}) after {:.1} s: {} frames, {} media bytes",
        duration.as_secs_f64(),
        muxer.frame_count(),
        muxer.media_region_bytes()
    );

    muxer.flush()?;
    let size = muxer.stream_len()?;
    if size < HEADER_SIZE as u64 {
        return Err(RecordError::TooSmallToFinalize { size });
    }

    let frames = muxer.frame_count();
    if frames == 0 {
        return Err(RecordError::NoFrames);
    }

    let actual_fps = if config.measure_fps {
        measured_fps(frames, duration)
    } else {
        config.fps
    };

    let finished = muxer.finish(actual_fps)?;
    let fps = finished.stats.effective_fps();
    let file_size = finished.file_size;
    drop(finished.writer);

    log::info!(
        "Done. F:{frames} T:{}s FPS:{fps} Size:{:.2}MB",
        duration.as_secs(),
        mib(file_size)
    );

    Ok(RecordingSummary {
        path: path.to_path_buf(),
        frames,
        duration,
        fps,
        file_size,
        stop_reason,
        started_at,
        ended_at: Utc::now(),
    })
}

/// Frames per whole elapsed second; 0 when under one second has passed.
pub fn measured_fps(frames: u32, elapsed: Duration) -> u32 {
    match elapsed.as_secs() {
        0 => 0,
        secs => (frames as u64 / secs) as u32,
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("Failed to remove {}: {e}", path.display());
    } else {
        log::info!("Removed unusable recording {}", path.display());
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avi::header::HeaderSummary;
    use crate::avi::quartet::read_u32_le;
    use std::collections::VecDeque;
    use std::io::{self, Cursor, SeekFrom};
    use std::sync::Arc;

    /// In-memory sink that refuses writes past `limit` bytes, like a full card.
    struct FullDisk {
        inner: Cursor<Vec<u8>>,
        limit: u64,
    }

    impl FullDisk {
        fn new(limit: u64) -> Self {
            Self {
                inner: Cursor::new(Vec::new()),
                limit,
            }
        }
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.inner.position() + buf.len() as u64 > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Seek for FullDisk {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    /// Scripted source; optionally raises the stop flag after N frames.
    struct ScriptedSource {
        frames: VecDeque<Acquired>,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
        handed_out: usize,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Acquired>) -> Self {
            Self {
                frames: frames.into(),
                stop_after: None,
                handed_out: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self, _timeout: Duration) -> Acquired {
            let next = self.frames.pop_front().unwrap_or(Acquired::Finished);
            if matches!(next, Acquired::Frame(_)) {
                self.handed_out += 1;
                if let Some((n, flag)) = &self.stop_after {
                    if self.handed_out >= *n {
                        flag.store(true, Ordering::Relaxed);
                    }
                }
            }
            next
        }
    }

    fn fast_config() -> RecordingConfig {
        RecordingConfig {
            pace_frames: false,
            frame_timeout_ms: 10,
            ..RecordingConfig::default()
        }
    }

    fn frames(lens: &[usize]) -> Vec<Acquired> {
        lens.iter().map(|&n| Acquired::Frame(vec![0xAA; n])).collect()
    }

    #[test]
    fn three_frames_produce_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        let mut source = ScriptedSource::new(frames(&[100, 101, 103]));
        let stop = AtomicBool::new(false);

        let summary = record(&mut source, &path, &fast_config(), &stop).unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.stop_reason, StopReason::SourceExhausted);
        // Under a second of wall time, so the target rate is used
        assert_eq!(summary.fps, 10);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, summary.file_size);
        assert_eq!(bytes.len(), HEADER_SIZE + 332 + 8 + 48);

        let header = HeaderSummary::parse(&bytes).unwrap();
        assert_eq!(header.media_region_size, 336);
        assert_eq!(header.total_frames, 3);
        assert_eq!((header.width, header.height), (320, 240));
        assert_eq!(header.usec_per_frame, 100_000);
        assert_eq!(read_u32_le(&bytes, HEADER_SIZE + 332 + 4), Some(48));
    }

    #[test]
    fn empty_frames_and_timeouts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        let mut source = ScriptedSource::new(vec![
            Acquired::Frame(Vec::new()),
            Acquired::Timeout,
            Acquired::Frame(vec![1; 10]),
            Acquired::Frame(Vec::new()),
            Acquired::Frame(vec![2; 12]),
        ]);
        let stop = AtomicBool::new(false);

        let summary = record(&mut source, &path, &fast_config(), &stop).unwrap();
        assert_eq!(summary.frames, 2);
        let header = HeaderSummary::parse(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(header.total_frames, 2);
        assert_eq!(header.stream_length, 2);
    }

    #[test]
    fn stop_request_after_two_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = ScriptedSource::new(frames(&[40; 10]));
        source.stop_after = Some((2, stop.clone()));

        let summary = record(&mut source, &path, &fast_config(), &stop).unwrap();
        assert_eq!(summary.stop_reason, StopReason::StopRequested);
        assert_eq!(summary.frames, 2);

        let bytes = fs::read(&path).unwrap();
        let header = HeaderSummary::parse(&bytes).unwrap();
        assert_eq!(header.total_frames, 2);
        assert_eq!(header.riff_size as usize, bytes.len() - 8);
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * 48 + 8 + 32);
    }

    #[test]
    fn size_ceiling_stops_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        let mut source = ScriptedSource::new(frames(&[1000; 10]));
        let stop = AtomicBool::new(false);
        let config = RecordingConfig {
            max_file_bytes: HEADER_SIZE as u64 + 2500,
            ..fast_config()
        };

        let summary = record(&mut source, &path, &config, &stop).unwrap();
        assert_eq!(summary.stop_reason, StopReason::SizeCeiling);
        assert_eq!(summary.frames, 3);
        assert!(HeaderSummary::parse(&fs::read(&path).unwrap()).is_ok());
    }

    #[test]
    fn zero_frames_fails_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        let mut source = ScriptedSource::new(vec![Acquired::Frame(Vec::new())]);
        let stop = AtomicBool::new(false);

        let err = record(&mut source, &path, &fast_config(), &stop).unwrap_err();
        assert!(matches!(err, RecordError::NoFrames));
        assert!(!path.exists());
    }

    #[test]
    fn unopenable_path_is_sink_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("video.avi");
        let mut source = ScriptedSource::new(frames(&[8]));
        let stop = AtomicBool::new(false);

        let err = record(&mut source, &path, &fast_config(), &stop).unwrap_err();
        assert!(matches!(err, RecordError::SinkOpen { .. }));
    }

    #[test]
    fn existing_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        fs::write(&path, vec![0x55; 10_000]).unwrap();
        let mut source = ScriptedSource::new(frames(&[4]));
        let stop = AtomicBool::new(false);

        let summary = record(&mut source, &path, &fast_config(), &stop).unwrap();
        assert_eq!(summary.file_size, (HEADER_SIZE + 12 + 8 + 16) as u64);
    }

    #[test]
    fn nominal_fps_when_not_measuring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.avi");
        let mut source = ScriptedSource::new(frames(&[4, 4]));
        let stop = AtomicBool::new(false);
        let config = RecordingConfig {
            fps: 25,
            measure_fps: false,
            ..fast_config()
        };

        let summary = record(&mut source, &path, &config, &stop).unwrap();
        assert_eq!(summary.fps, 25);
        let header = HeaderSummary::parse(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(header.rate, 25);
        assert_eq!(header.usec_per_frame, 40_000);
    }

    #[test]
    fn measured_fps_uses_whole_seconds() {
        assert_eq!(measured_fps(30, Duration::from_millis(999)), 0);
        assert_eq!(measured_fps(30, Duration::from_millis(2500)), 15);
        assert_eq!(measured_fps(1, Duration::from_secs(5)), 0);
    }

    #[test]
    fn write_failure_mid_capture_is_mux_error() {
        let mut source = ScriptedSource::new(frames(&[40; 5]));
        let stop = AtomicBool::new(false);
        let sink = FullDisk::new(HEADER_SIZE as u64 + 100);

        let err = record_to(&mut source, sink, Path::new("full.avi"), &fast_config(), &stop)
            .unwrap_err();
        assert!(matches!(err, RecordError::Mux(_)));
    }

    #[test]
    fn write_failure_on_header_is_mux_error() {
        let mut source = ScriptedSource::new(frames(&[40]));
        let stop = AtomicBool::new(false);

        let err = record_to(
            &mut source,
            FullDisk::new(10),
            Path::new("full.avi"),
            &fast_config(),
            &stop,
        )
        .unwrap_err();
        assert!(matches!(err, RecordError::Mux(_)));
    }

    #[test]
    fn record_to_finalizes_into_any_sink() {
        let mut source = ScriptedSource::new(frames(&[100, 101, 103]));
        let stop = AtomicBool::new(false);
        let sink = FullDisk::new(u64::MAX);

        let summary =
            record_to(&mut source, sink, Path::new("mem.avi"), &fast_config(), &stop).unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.file_size, (HEADER_SIZE + 332 + 8 + 48) as u64);
    }
}
