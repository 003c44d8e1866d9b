use crate::error::{RecordError, RecordResult};
use crate::flv::{decode_tag_at, TRAILER_LEN};
use std::io::{Read, Seek, SeekFrom};

/// Timestamp of the last tag in the container, found by stepping back one tag
/// from the end of the file.
///
/// Returns 0 for empty, header-only, truncated or otherwise unreadable files.
/// The result is advisory (resume offset, listing duration), so failures are
/// never surfaced to the caller.
pub fn probe_last_timestamp<R: Read + Seek>(file: &mut R) -> u32 {
    match last_timestamp(file) {
        Ok(ts) => ts,
        Err(e) => {
            tracing::debug!("duration probe fell back to 0: {}", e);
            0
        }
    }
}

fn last_timestamp<R: Read + Seek>(file: &mut R) -> RecordResult<u32> {
    let end = file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))? + TRAILER_LEN as u64;
    let mut buf = [0u8; TRAILER_LEN];
    file.read_exact(&mut buf)?;
    let tag_size = u32::from_be_bytes(buf) as u64;

    let start = end
        .checked_sub(tag_size + TRAILER_LEN as u64)
        .ok_or_else(|| RecordError::malformed(0, format!("trailing size {} points before file start", tag_size)))?;
    let header = decode_tag_at(file, start)?;
    if header.tag_size() as u64 != tag_size {
        return Err(RecordError::malformed(
            start,
            format!("trailing size {} disagrees with tag size {}", tag_size, header.tag_size()),
        ));
    }
    Ok(header.timestamp)
}
