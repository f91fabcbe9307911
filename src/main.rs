mod args;
mod avi;
mod config;
mod recording;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use args::{Command, RecordArgs};
use avi::header::{HeaderSummary, HEADER_SIZE};
use recording::recorder::{self, RecordingSummary};
use recording::source::{DirectorySource, MjpegCapture};
use recording::SessionMetadata;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = args::parse_args();
    let result = match args.command {
        Command::Record(record) => run_record(&record),
        Command::Inspect { path } => run_inspect(&path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_record(args: &RecordArgs) -> Result<(), String> {
    let config = args.resolve_config()?;
    log::info!("AviRec starting");

    let (path, session_dir) =
        output_target(args.output.as_deref(), recording::create_session_dir)?;

    let stop = Arc::new(AtomicBool::new(false));
    if let Some(stop_file) = &args.stop_file {
        watch_stop_file(stop_file.clone(), stop.clone())?;
    }
    let result = if let Some(dir) = &args.frames_dir {
        let mut source = DirectorySource::open(dir)?;
        if source.remaining() == 0 {
            return Err(format!("No JPEG files in {}", dir.display()));
        }
        recorder::record(&mut source, &path, &config, &stop)
    } else {
        let (capture, mut source) = MjpegCapture::start(std::io::stdin(), args.ring_frames)?;
        let result = recorder::record(&mut source, &path, &config, &stop);
        drop(capture);
        result
    };
    let summary = result.map_err(|e| format!("Recording failed: {e}"))?;

    match &session_dir {
        Some(dir) => write_session_metadata(dir, &summary, &config)?,
        None => log::info!("Explicit output path, skipping session metadata"),
    }
    println!("{}", summary.path.display());
    Ok(())
}

/// Raise `stop` once `path` appears on disk. The watcher exits with the process.
fn watch_stop_file(path: PathBuf, stop: Arc<AtomicBool>) -> Result<(), String> {
    const POLL: Duration = Duration::from_millis(250);
    if path.exists() {
        log::warn!("Stop file {} already exists, ignoring it", path.display());
        return Ok(());
    }
    thread::Builder::new()
        .name("stop-watch".into())
        .spawn(move || {
            while !path.exists() {
                thread::sleep(POLL);
            }
            log::info!("Stop file {} found, stopping", path.display());
            stop.store(true, Ordering::Relaxed);
        })
        .map_err(|e| format!("Failed to spawn stop watcher: {e}"))?;
    Ok(())
}

/// Where to record: an explicit `--output`, or a new file in a fresh session
/// directory. The directory is returned only when it was created here, since
/// the metadata sidecar belongs to it.
fn output_target(
    output: Option<&Path>,
    create_dir: impl FnOnce() -> Result<PathBuf, String>,
) -> Result<(PathBuf, Option<PathBuf>), String> {
    match output {
        Some(path) => Ok((path.to_path_buf(), None)),
        None => {
            let dir = create_dir()?;
            Ok((dir.join(recording::recording_filename()), Some(dir)))
        }
    }
}

fn write_session_metadata(
    dir: &Path,
    summary: &RecordingSummary,
    config: &config::RecordingConfig,
) -> Result<(), String> {
    let metadata = SessionMetadata::from_summary(summary, config.width, config.height, config.fps);
    recording::write_metadata(dir, &metadata)
}

fn run_inspect(path: &Path) -> Result<(), String> {
    let mut file =
        File::open(path).map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    file.by_ref()
        .take(HEADER_SIZE as u64)
        .read_to_end(&mut buf)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;

    let summary = HeaderSummary::parse(&buf)?;
    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| format!("Failed to serialize summary: {e}"))?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_output_has_no_session_dir() {
        let (path, dir) = output_target(Some(Path::new("clips/x.avi")), || {
            panic!("session dir must not be created for an explicit output")
        })
        .unwrap();
        assert_eq!(path, PathBuf::from("clips/x.avi"));
        assert!(dir.is_none());
    }

    #[test]
    fn default_output_lands_in_session_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let session = tmp.path().join("2026-01-01_00-00-00");
        let (path, dir) = output_target(None, || Ok(session.clone())).unwrap();
        assert_eq!(dir.as_deref(), Some(session.as_path()));
        assert_eq!(path.parent(), Some(session.as_path()));
        assert!(path.extension().is_some_and(|ext| ext == "avi"));
    }
}
