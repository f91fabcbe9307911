use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::RecordingConfig;

#[derive(Parser, Debug)]
#[command(version, about, long_about = "Records MJPEG frames into a seekable AVI file.")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record frames into a new AVI file
    Record(RecordArgs),
    /// Print the header summary of a finished AVI file
    Inspect {
        path: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
pub struct RecordArgs {
    /// Mux every JPEG in this directory, in file-name order
    #[arg(long, conflicts_with = "stdin", required_unless_present = "stdin")]
    pub frames_dir: Option<PathBuf>,
    /// Read a concatenated MJPEG stream from stdin
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub stdin: bool,
    /// Output file (default: a new session directory under ~/AviRec/recordings)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// JSON config file; flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub fps: Option<u32>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    /// Recording limit in seconds
    #[arg(short, long)]
    pub duration: Option<u64>,
    /// Stop once the file exceeds this many MiB
    #[arg(long)]
    pub max_size_mb: Option<u64>,
    /// Stop recording (and finalize) once this file exists
    #[arg(long)]
    pub stop_file: Option<PathBuf>,
    /// Capture ring depth in frames (stdin only)
    #[arg(long, default_value = "8")]
    pub ring_frames: usize,
}

pub fn parse_args() -> Args {
    Args::parse()
}

impl RecordArgs {
    /// Build the effective config: defaults, then the config file, then flags.
    pub fn resolve_config(&self) -> Result<RecordingConfig, String> {
        let mut config = match &self.config {
            Some(path) => RecordingConfig::load(path)?,
            None => RecordingConfig::default(),
        };

        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(secs) = self.duration {
            config.duration_secs = secs;
        }
        if let Some(mb) = self.max_size_mb {
            config.max_file_bytes = mb
                .checked_mul(1024 * 1024)
                .ok_or_else(|| format!("--max-size-mb {mb} is too large"))?;
        }

        // Stills on disk are muxed as fast as they read, at the nominal rate
        if self.frames_dir.is_some() {
            config.pace_frames = false;
            config.measure_fps = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "avirec", "record", "--stdin", "--fps", "15", "--max-size-mb", "2",
        ])
        .unwrap();
        let Command::Record(record) = args.command else {
            panic!("expected record");
        };
        let config = record.resolve_config().unwrap();
        assert_eq!(config.fps, 15);
        assert_eq!(config.max_file_bytes, 2 * 1024 * 1024);
        assert!(config.pace_frames);
        assert!(config.measure_fps);
    }

    #[test]
    fn frames_dir_muxes_offline() {
        let args =
            Args::try_parse_from(["avirec", "record", "--frames-dir", "/tmp/frames"]).unwrap();
        let Command::Record(record) = args.command else {
            panic!("expected record");
        };
        let config = record.resolve_config().unwrap();
        assert!(!config.pace_frames);
        assert!(!config.measure_fps);
    }

    #[test]
    fn source_is_required_and_exclusive() {
        assert!(Args::try_parse_from(["avirec", "record"]).is_err());
        assert!(
            Args::try_parse_from(["avirec", "record", "--stdin", "--frames-dir", "x"]).is_err()
        );
    }

    #[test]
    fn zero_fps_rejected() {
        let args =
            Args::try_parse_from(["avirec", "record", "--stdin", "--fps", "0"]).unwrap();
        let Command::Record(record) = args.command else {
            panic!("expected record");
        };
        assert!(record.resolve_config().is_err());
    }

    #[test]
    fn oversized_size_ceiling_rejected() {
        let args = Args::try_parse_from([
            "avirec",
            "record",
            "--stdin",
            "--max-size-mb",
            "18446744073709551615",
        ])
        .unwrap();
        let Command::Record(record) = args.command else {
            panic!("expected record");
        };
        let err = record.resolve_config().unwrap_err();
        assert!(err.contains("too large"));
    }
}
