//! The fixed 252-byte RIFF/AVI header: template construction, finalize-time
//! patching, and read-back for inspection.
//!
//! The header is written once as a placeholder before any frame data, then
//! patched in place once the real totals are known. Until that patch runs the
//! file is not a valid container.

use std::io::{Seek, SeekFrom, Write};

use serde::Serialize;

use super::quartet::{encode_u32_le, put_u32_le, read_u32_le};

pub const HEADER_SIZE: usize = 252;

// Patched fields (byte offsets from file start)
pub const RIFF_SIZE_OFFSET: u64 = 0x04;
pub const USEC_PER_FRAME_OFFSET: u64 = 0x20;
pub const TOTAL_FRAMES_OFFSET: u64 = 0x30;
pub const WIDTH_OFFSET: u64 = 0x40;
pub const HEIGHT_OFFSET: u64 = 0x44;
pub const STREAM_RATE_OFFSET: u64 = 0x84;
pub const STREAM_LENGTH_OFFSET: u64 = 0x8C;
pub const FORMAT_WIDTH_OFFSET: u64 = 0xA8;
pub const FORMAT_HEIGHT_OFFSET: u64 = 0xAC;
pub const MEDIA_REGION_SIZE_OFFSET: u64 = 0xE0;

// Static structure
const HDRL_LIST_SIZE: u32 = 208;
const AVIH_SIZE: u32 = 56;
const STRL_LIST_SIZE: u32 = 116;
const STRH_SIZE: u32 = 56;
const STRF_SIZE: u32 = 40;
const BITMAPINFO_SIZE: u32 = 40;
const STREAM_COUNT: u32 = 1;
const STREAM_SCALE: u32 = 1;
const SUGGESTED_BUFFER_SIZE: u32 = 32 * 1024;
/// -1: let the decoder pick its default quality.
const QUALITY_DEFAULT: u32 = 0xFFFF_FFFF;
const PLANES: u16 = 1;
const BITS_PER_PIXEL: u16 = 24;

/// The media-region size also counts its own "movi" label.
const MEDIA_REGION_LABEL_WIDTH: u32 = 4;

/// Final session totals, known only once capture has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalStats {
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    /// Measured rate over the whole session. May be 0.
    pub actual_fps: u32,
    /// Requested rate, used when `actual_fps` is 0.
    pub target_fps: u32,
    /// Sum of `8 + declared_len` over every frame chunk.
    pub media_region_bytes: u32,
}

impl FinalStats {
    /// The rate written into the header and used for the per-frame duration.
    pub fn effective_fps(&self) -> u32 {
        if self.actual_fps > 0 {
            self.actual_fps
        } else {
            self.target_fps.max(1)
        }
    }
}

/// Build the header placeholder for an MJPEG single-video-stream AVI.
///
/// Dimensions and rate are deliberately left zero here; they land in the
/// header only when [`patch_header`] runs.
pub fn header_template(width: u32, height: u32, fps: u32) -> [u8; HEADER_SIZE] {
    log::debug!("Preparing AVI header template for {width}x{height} @ {fps} fps");

    let mut buf = [0u8; HEADER_SIZE];

    // RIFF 'AVI '
    put_tag(&mut buf, 0x00, b"RIFF");
    put_tag(&mut buf, 0x08, b"AVI ");

    // LIST 'hdrl'
    put_tag(&mut buf, 0x0C, b"LIST");
    put_u32_le(&mut buf, 0x10, HDRL_LIST_SIZE);
    put_tag(&mut buf, 0x14, b"hdrl");

    // avih
    put_tag(&mut buf, 0x18, b"avih");
    put_u32_le(&mut buf, 0x1C, AVIH_SIZE);
    put_u32_le(&mut buf, 0x38, STREAM_COUNT);

    // LIST 'strl'
    put_tag(&mut buf, 0x58, b"LIST");
    put_u32_le(&mut buf, 0x5C, STRL_LIST_SIZE);
    put_tag(&mut buf, 0x60, b"strl");

    // strh
    put_tag(&mut buf, 0x64, b"strh");
    put_u32_le(&mut buf, 0x68, STRH_SIZE);
    put_tag(&mut buf, 0x6C, b"vids");
    put_tag(&mut buf, 0x70, b"MJPG");
    put_u32_le(&mut buf, 0x80, STREAM_SCALE);
    put_u32_le(&mut buf, 0x90, SUGGESTED_BUFFER_SIZE);
    put_u32_le(&mut buf, 0x94, QUALITY_DEFAULT);

    // strf (BITMAPINFOHEADER)
    put_tag(&mut buf, 0xA4, b"strf");
    put_u32_le(&mut buf, 0xA8, STRF_SIZE);
    put_u32_le(&mut buf, 0xAC, BITMAPINFO_SIZE);
    buf[0xB8..0xBA].copy_from_slice(&PLANES.to_le_bytes());
    buf[0xBA..0xBC].copy_from_slice(&BITS_PER_PIXEL.to_le_bytes());
    put_tag(&mut buf, 0xBC, b"MJPG");

    // LIST 'movi'
    put_tag(&mut buf, 0xD4, b"LIST");
    put_tag(&mut buf, 0xDC, b"movi");

    buf
}

fn put_tag(buf: &mut [u8], offset: usize, tag: &[u8; 4]) {
    buf[offset..offset + 4].copy_from_slice(tag);
}

/// Rewrite the header at file start and patch every summary field with its
/// final value. Leaves the stream positioned at end of file.
///
/// The whole header is rewritten before patching, so running this twice with
/// the same stats produces identical bytes. A stream shorter than the header
/// is rejected without being touched.
pub fn patch_header<W: Write + Seek>(
    w: &mut W,
    header: &[u8; HEADER_SIZE],
    stats: &FinalStats,
) -> Result<(), String> {
    let file_size = w
        .seek(SeekFrom::End(0))
        .map_err(|e| format!("seek error: {e}"))?;
    if file_size < HEADER_SIZE as u64 {
        return Err(format!(
            "file is {file_size} bytes, smaller than the {HEADER_SIZE}-byte header"
        ));
    }

    let riff = riff_size(file_size)?;

    w.seek(SeekFrom::Start(0))
        .map_err(|e| format!("seek error: {e}"))?;
    w.write_all(header)
        .map_err(|e| format!("write error: {e}"))?;

    if stats.actual_fps == 0 {
        log::warn!(
            "Measured fps is 0, falling back to target fps {} for frame timing",
            stats.target_fps
        );
    }
    let fps = stats.effective_fps();
    let usec_per_frame = 1_000_000 / fps;

    patch_field(w, RIFF_SIZE_OFFSET, riff)?;
    patch_field(w, USEC_PER_FRAME_OFFSET, usec_per_frame)?;
    patch_field(w, STREAM_RATE_OFFSET, fps)?;

    patch_field(w, WIDTH_OFFSET, stats.width)?;
    patch_field(w, HEIGHT_OFFSET, stats.height)?;
    patch_field(w, TOTAL_FRAMES_OFFSET, stats.frame_count)?;

    patch_field(w, STREAM_LENGTH_OFFSET, stats.frame_count)?;
    patch_field(w, FORMAT_WIDTH_OFFSET, stats.width)?;
    patch_field(w, FORMAT_HEIGHT_OFFSET, stats.height)?;

    patch_field(
        w,
        MEDIA_REGION_SIZE_OFFSET,
        stats.media_region_bytes.wrapping_add(MEDIA_REGION_LABEL_WIDTH),
    )?;

    w.seek(SeekFrom::End(0))
        .map_err(|e| format!("seek error: {e}"))?;
    w.flush().map_err(|e| format!("flush error: {e}"))?;
    Ok(())
}

/// Value of the top-level RIFF size field for a file of `file_size` bytes.
pub fn riff_size(file_size: u64) -> Result<u32, String> {
    u32::try_from(file_size.saturating_sub(8))
        .map_err(|_| format!("file of {file_size} bytes exceeds the 4 GiB RIFF limit"))
}

fn patch_field<W: Write + Seek>(w: &mut W, offset: u64, value: u32) -> Result<(), String> {
    w.seek(SeekFrom::Start(offset))
        .map_err(|e| format!("seek error: {e}"))?;
    encode_u32_le(value, w)
}

/// Summary fields read back from a finalized header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderSummary {
    pub riff_size: u32,
    pub usec_per_frame: u32,
    pub total_frames: u32,
    pub streams: u32,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub rate: u32,
    pub stream_length: u32,
    pub format_width: u32,
    pub format_height: u32,
    pub media_region_size: u32,
}

impl HeaderSummary {
    /// Parse the leading header bytes of a container written by this crate.
    pub fn parse(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < HEADER_SIZE {
            return Err(format!(
                "header truncated: {} of {HEADER_SIZE} bytes",
                buf.len()
            ));
        }
        for (offset, tag) in [
            (0x00, b"RIFF"),
            (0x08, b"AVI "),
            (0x18, b"avih"),
            (0x64, b"strh"),
            (0xDC, b"movi"),
        ] {
            if &buf[offset..offset + 4] != tag {
                return Err(format!(
                    "expected '{}' at 0x{offset:02X}",
                    String::from_utf8_lossy(tag)
                ));
            }
        }

        let field = |offset: u64| read_u32_le(buf, offset as usize).unwrap_or(0);
        Ok(Self {
            riff_size: field(RIFF_SIZE_OFFSET),
            usec_per_frame: field(USEC_PER_FRAME_OFFSET),
            total_frames: field(TOTAL_FRAMES_OFFSET),
            streams: field(0x38),
            width: field(WIDTH_OFFSET),
            height: field(HEIGHT_OFFSET),
            codec: String::from_utf8_lossy(&buf[0x70..0x74]).into_owned(),
            rate: field(STREAM_RATE_OFFSET),
            stream_length: field(STREAM_LENGTH_OFFSET),
            format_width: field(FORMAT_WIDTH_OFFSET),
            format_height: field(FORMAT_HEIGHT_OFFSET),
            media_region_size: field(MEDIA_REGION_SIZE_OFFSET),
        })
    }
}
