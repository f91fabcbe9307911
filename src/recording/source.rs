use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Result of one frame acquisition attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Acquired {
    /// Encoded frame bytes. May be empty if acquisition produced nothing usable.
    Frame(Vec<u8>),
    /// Nothing arrived within the timeout; try again.
    Timeout,
    /// The source has no more frames.
    Finished,
}

/// Anything that hands out encoded JPEG frames one at a time.
pub trait FrameSource {
    fn next_frame(&mut self, timeout: Duration) -> Acquired;
}

// ---------------------------------------------------------------------------
// Directory of still JPEG files
// ---------------------------------------------------------------------------

/// Replays `*.jpg` / `*.jpeg` files from a directory in file-name order.
pub struct DirectorySource {
    files: std::vec::IntoIter<PathBuf>,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self, String> {
        let entries = fs::read_dir(dir)
            .map_err(|e| format!("Failed to read frame directory {}: {e}", dir.display()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_jpeg_path(path))
            .collect();
        files.sort();

        log::info!("Frame directory {}: {} JPEG files", dir.display(), files.len());
        Ok(Self {
            files: files.into_iter(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self, _timeout: Duration) -> Acquired {
        let Some(path) = self.files.next() else {
            return Acquired::Finished;
        };
        match fs::read(&path) {
            Ok(data) => Acquired::Frame(data),
            Err(e) => {
                log::warn!("Failed to read frame {}: {e}", path.display());
                Acquired::Frame(Vec::new())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Ring buffer fed by a capture thread
// ---------------------------------------------------------------------------

/// Consumer end of the capture ring.
pub struct RingSource {
    consumer: HeapCons<Vec<u8>>,
    producer_done: Arc<AtomicBool>,
}

impl FrameSource for RingSource {
    fn next_frame(&mut self, timeout: Duration) -> Acquired {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(frame) = self.consumer.try_pop() {
                return Acquired::Frame(frame);
            }
            if self.producer_done.load(Ordering::Acquire) {
                // The producer may have pushed between the pop and the flag load
                return match self.consumer.try_pop() {
                    Some(frame) => Acquired::Frame(frame),
                    None => Acquired::Finished,
                };
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Acquired::Timeout;
            }
            thread::sleep(Duration::from_micros(500));
        }
    }
}

/// Capture thread: reads a concatenated MJPEG byte stream (e.g. stdin) and
/// pushes each complete JPEG into the ring.
pub struct MjpegCapture {
    thread: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl MjpegCapture {
    /// Start the capture thread. `capacity` is the ring depth in frames.
    pub fn start<R: Read + Send + 'static>(
        reader: R,
        capacity: usize,
    ) -> Result<(Self, RingSource), String> {
        let ring = HeapRb::<Vec<u8>>::new(capacity.max(1));
        let (producer, consumer) = ring.split();

        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let done_flag = done.clone();

        let thread = thread::Builder::new()
            .name("mjpeg-capture".into())
            .spawn(move || {
                if let Err(e) = capture_loop(reader, producer, &stop_flag) {
                    log::error!("Capture thread error: {e}");
                }
                done_flag.store(true, Ordering::Release);
            })
            .map_err(|e| format!("Failed to spawn capture thread: {e}"))?;

        let source = RingSource {
            consumer,
            producer_done: done.clone(),
        };
        Ok((
            Self {
                thread: Some(thread),
                stop,
                done,
            },
            source,
        ))
    }
}

impl Drop for MjpegCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // A thread still blocked in read() cannot be woken; leave it detached.
        if self.done.load(Ordering::Acquire) {
            if let Some(t) = self.thread.take() {
                let _ = t.join();
            }
        }
        log::info!("MJPEG capture stopped");
    }
}

const READ_CHUNK: usize = 16 * 1024;

fn capture_loop<R: Read>(
    mut reader: R,
    mut producer: HeapProd<Vec<u8>>,
    stop: &AtomicBool,
) -> Result<(), String> {
    let mut splitter = MjpegSplitter::default();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut dropped = 0usize;

    while !stop.load(Ordering::Relaxed) {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(format!("read error: {e}")),
        };

        for frame in splitter.push(&chunk[..n]) {
            // Ring full: the recorder is behind, drop this frame
            if producer.try_push(frame).is_err() {
                dropped += 1;
                log::debug!("Capture ring full, dropped frame ({dropped} total)");
            }
        }
    }

    log::info!("Capture input ended ({dropped} frames dropped)");
    Ok(())
}

/// Splits a byte stream into JPEG images on SOI (FF D8) / EOI (FF D9) markers.
///
/// Bytes outside an SOI..EOI pair are discarded. A JPEG that embeds another
/// JPEG (EXIF thumbnail) is cut at the inner EOI.
#[derive(Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

impl MjpegSplitter {
    /// Feed more bytes, returning every image completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buf, SOI, 0) else {
                // Keep a trailing 0xFF that may begin the next SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let len = self.buf.len();
                self.buf.drain(..len - keep);
                break;
            };
            let Some(end) = find_marker(&self.buf, EOI, start + 2) else {
                self.buf.drain(..start);
                break;
            };
            frames.push(self.buf[start..end + 2].to_vec());
            self.buf.drain(..end + 2);
        }

        frames
    }
}

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}
