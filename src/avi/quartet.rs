//! Little-endian 32-bit field codec used for every numeric field in the container.

use std::io::Write;

/// Write `value` as 4 bytes, least-significant byte first.
pub fn encode_u32_le<W: Write>(value: u32, w: &mut W) -> Result<(), String> {
    w.write_all(&value.to_le_bytes())
        .map_err(|e| format!("write error: {e}"))
}

/// Read a little-endian u32 out of `buf` at `offset`.
/// Returns None if fewer than 4 bytes remain.
pub fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Overwrite 4 bytes of an in-memory buffer with `value` (little-endian).
pub fn put_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
