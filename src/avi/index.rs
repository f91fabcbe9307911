use std::io::Write;

use super::quartet::encode_u32_le;
use super::FRAME_CHUNK_TAG;

const INDEX_TAG: &[u8; 4] = b"idx1";
/// AVIIF_KEYFRAME: every MJPEG frame decodes on its own.
const KEYFRAME_FLAG: u32 = 0x10;
const ENTRY_SIZE: u32 = 16;

/// Location of one frame chunk, relative to the start of the media region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub offset: u32,
    /// Declared (padded) chunk length.
    pub size: u32,
}

/// Accumulates one record per accepted frame and emits the idx1 trailer.
#[derive(Debug, Default)]
pub struct ChunkIndex {
    records: Vec<IndexRecord>,
}

impl ChunkIndex {
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            records: Vec::with_capacity(frames),
        }
    }

    pub fn push(&mut self, record: IndexRecord) {
        self.records.push(record);
    }

    /// Size in bytes of the trailer [`emit_trailer`](Self::emit_trailer) writes.
    pub fn trailer_len(&self) -> u64 {
        8 + ENTRY_SIZE as u64 * self.records.len() as u64
    }

    /// Write `idx1` + size + one 16-byte entry per record, in arrival order.
    pub fn emit_trailer<W: Write>(&self, w: &mut W) -> Result<(), String> {
        let size = u32::try_from(self.trailer_len() - 8).map_err(|_| {
            format!("index of {} entries exceeds the 4 GiB chunk limit", self.records.len())
        })?;

        w.write_all(INDEX_TAG)
            .map_err(|e| format!("write error: {e}"))?;
        encode_u32_le(size, w)?;

        for record in &self.records {
            w.write_all(FRAME_CHUNK_TAG)
                .map_err(|e| format!("write error: {e}"))?;
            encode_u32_le(KEYFRAME_FLAG, w)?;
            encode_u32_le(record.offset, w)?;
            encode_u32_le(record.size, w)?;
        }
        Ok(())
    }
}
