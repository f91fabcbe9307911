//! Streaming MJPEG AVI writer.
//!
//! Writes the header placeholder up front, appends one `00dc` chunk per frame
//! in a single forward pass, then on finish appends the `idx1` trailer and
//! seeks back to patch the header with the real totals.

use std::io::{Seek, SeekFrom, Write};

use super::header::{header_template, patch_header, riff_size, FinalStats, HEADER_SIZE};
use super::index::{ChunkIndex, IndexRecord};
use super::quartet::encode_u32_le;
use super::FRAME_CHUNK_TAG;

/// Chunk tag + declared length.
const CHUNK_HEADER_SIZE: u32 = 8;
/// Offsets in the index are relative to the "movi" label, so the first chunk sits at 4.
const FIRST_CHUNK_OFFSET: u32 = 4;

const ZERO_PAD: [u8; 3] = [0; 3];

/// Bytes of zero padding needed to bring `len` up to a multiple of 4.
pub fn chunk_padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

pub struct AviWriter<W: Write + Seek> {
    writer: W,
    header: [u8; HEADER_SIZE],
    width: u32,
    height: u32,
    target_fps: u32,
    frame_count: u32,
    /// Running sum of `8 + declared_len` over every chunk written.
    media_region_bytes: u32,
    /// Offset of the next chunk relative to the media region.
    cursor: u32,
    index: ChunkIndex,
    /// Header plus every chunk so far; equals the file length until finish.
    bytes_written: u64,
}

/// What [`AviWriter::finish`] hands back.
pub struct FinishedAvi<W> {
    pub writer: W,
    pub stats: FinalStats,
    pub file_size: u64,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Create a writer and immediately write the header placeholder.
    pub fn new(mut writer: W, width: u32, height: u32, target_fps: u32) -> Result<Self, String> {
        let header = header_template(width, height, target_fps);
        writer
            .write_all(&header)
            .map_err(|e| format!("write error: {e}"))?;

        Ok(Self {
            writer,
            header,
            width,
            height,
            target_fps,
            frame_count: 0,
            media_region_bytes: 0,
            cursor: FIRST_CHUNK_OFFSET,
            index: ChunkIndex::default(),
            bytes_written: HEADER_SIZE as u64,
        })
    }

    /// Pre-size the index for an expected number of frames.
    pub fn reserve_frames(&mut self, frames: usize) {
        self.index = ChunkIndex::with_capacity(frames);
    }

    /// Append one encoded frame as a `00dc` chunk.
    ///
    /// An empty payload is skipped and yields `Ok(None)`; the caller is
    /// expected to just try the next frame.
    pub fn append_frame(&mut self, payload: &[u8]) -> Result<Option<IndexRecord>, String> {
        if payload.is_empty() {
            return Ok(None);
        }

        let pad = chunk_padding(payload.len());
        let declared_len = u32::try_from(payload.len() + pad)
            .map_err(|_| format!("frame of {} bytes is too large", payload.len()))?;
        let chunk_len = CHUNK_HEADER_SIZE + declared_len;
        let next_cursor = self
            .cursor
            .checked_add(chunk_len)
            .ok_or("media region exceeds 4 GiB")?;

        self.writer
            .write_all(FRAME_CHUNK_TAG)
            .map_err(|e| format!("write error: {e}"))?;
        encode_u32_le(declared_len, &mut self.writer)?;
        self.writer
            .write_all(payload)
            .map_err(|e| format!("write error: {e}"))?;
        self.writer
            .write_all(&ZERO_PAD[..pad])
            .map_err(|e| format!("write error: {e}"))?;

        let record = IndexRecord {
            offset: self.cursor,
            size: declared_len,
        };
        self.index.push(record);
        self.cursor = next_cursor;
        self.frame_count += 1;
        self.media_region_bytes += chunk_len;
        self.bytes_written += chunk_len as u64;

        Ok(Some(record))
    }

    /// Push buffered bytes down to the sink.
    pub fn flush(&mut self) -> Result<(), String> {
        self.writer.flush().map_err(|e| format!("flush error: {e}"))
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn media_region_bytes(&self) -> u32 {
        self.media_region_bytes
    }

    /// Bytes handed to the sink so far (header + chunks).
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Length of the underlying stream as the sink reports it.
    pub fn stream_len(&mut self) -> Result<u64, String> {
        let len = self
            .writer
            .seek(SeekFrom::End(0))
            .map_err(|e| format!("seek error: {e}"))?;
        Ok(len)
    }

    /// Append the index trailer and patch the header with final totals.
    ///
    /// `actual_fps` is the measured rate; 0 makes the header fall back to the
    /// target rate for frame timing.
    pub fn finish(mut self, actual_fps: u32) -> Result<FinishedAvi<W>, String> {
        // Refuse before writing anything the RIFF size field cannot describe
        riff_size(self.bytes_written + self.index.trailer_len())?;

        self.writer
            .seek(SeekFrom::End(0))
            .map_err(|e| format!("seek error: {e}"))?;
        self.index.emit_trailer(&mut self.writer)?;
        log::debug!(
            "Index written: {} entries, {} bytes",
            self.frame_count,
            self.index.trailer_len()
        );

        let stats = FinalStats {
            frame_count: self.frame_count,
            width: self.width,
            height: self.height,
            actual_fps,
            target_fps: self.target_fps,
            media_region_bytes: self.media_region_bytes,
        };
        patch_header(&mut self.writer, &self.header, &stats)?;

        let file_size = self
            .writer
            .stream_position()
            .map_err(|e| format!("seek error: {e}"))?;

        Ok(FinishedAvi {
            writer: self.writer,
            stats,
            file_size,
        })
    }
}
