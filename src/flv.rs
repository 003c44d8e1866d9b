//! FLV tag codec.
//!
//! ```text
//! +-------------+------+-------+------+-------+-----+
//! | FLV header  | Tag1 | Size1 | Tag2 | Size2 | ... |
//! | (13 bytes)  |      | (4 B) |      | (4 B) |     |
//! +-------------+------+-------+------+-------+-----+
//! ```
//!
//! Each tag is `[type:1][payload size:3][timestamp:3][timestamp ext:1][stream id:3]`
//! followed by the payload and a big-endian `u32` holding `11 + payload size`,
//! which lets a reader step backwards from the end of the file.

use crate::error::{RecordError, RecordResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Signature, version 1, audio+video flags, header length 9, `PreviousTagSize0`
pub const FLV_HEADER: [u8; 13] = [b'F', b'L', b'V', 0x01, 0x05, 0, 0, 0, 9, 0, 0, 0, 0];

pub const TAG_HEADER_LEN: usize = 11;
pub const TRAILER_LEN: usize = 4;
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Audio,
    Video,
    /// Metadata written by other muxers; never produced here
    Script,
}

impl TagType {
    pub fn code(self) -> u8 {
        match self {
            TagType::Audio => 8,
            TagType::Video => 9,
            TagType::Script => 18,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            8 => Some(TagType::Audio),
            9 => Some(TagType::Video),
            18 => Some(TagType::Script),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub tag_type: TagType,
    pub timestamp: u32,
    pub payload_len: u32,
}

impl TagHeader {
    /// Size of header plus payload, the value stored in the trailing field
    pub fn tag_size(&self) -> u32 {
        TAG_HEADER_LEN as u32 + self.payload_len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub tag_type: TagType,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Serialize one complete tag, trailing size included, into a single buffer.
pub fn encode_tag(tag_type: TagType, timestamp: u32, payload: &[u8]) -> RecordResult<Bytes> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(RecordError::PayloadTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(TAG_HEADER_LEN + payload.len() + TRAILER_LEN);
    buf.put_u8(tag_type.code());
    put_u24(&mut buf, payload.len() as u32);
    // lower 24 bits first, high byte goes in the extension slot
    put_u24(&mut buf, timestamp & 0xFF_FFFF);
    buf.put_u8((timestamp >> 24) as u8);
    put_u24(&mut buf, 0);
    buf.put_slice(payload);
    buf.put_u32((TAG_HEADER_LEN + payload.len()) as u32);
    Ok(buf.freeze())
}

/// Read and validate the tag header starting at `offset`.
///
/// The header is rejected when it sits inside the file header, is cut short,
/// carries an unknown type, or declares a payload that runs past the end of
/// the stream.
pub fn decode_tag_at<R: Read + Seek>(reader: &mut R, offset: u64) -> RecordResult<TagHeader> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if offset < FLV_HEADER.len() as u64 {
        return Err(RecordError::malformed(offset, "offset lies inside the file header"));
    }
    if offset + TAG_HEADER_LEN as u64 > file_len {
        return Err(RecordError::malformed(offset, "tag header is truncated"));
    }

    reader.seek(SeekFrom::Start(offset))?;
    let mut raw = [0u8; TAG_HEADER_LEN];
    reader.read_exact(&mut raw)?;
    let header = parse_header(&raw, offset)?;

    let end = offset + header.tag_size() as u64 + TRAILER_LEN as u64;
    if end > file_len {
        return Err(RecordError::malformed(
            offset,
            format!("payload of {} bytes runs past end of file ({})", header.payload_len, file_len),
        ));
    }
    Ok(header)
}

/// Check the file signature and return the audio/video flags byte.
pub fn read_file_header<R: Read>(reader: &mut R) -> RecordResult<u8> {
    let mut raw = [0u8; 13];
    reader
        .read_exact(&mut raw)
        .map_err(|_| RecordError::InvalidContainer("file is shorter than the FLV header".into()))?;
    if &raw[..3] != b"FLV" {
        return Err(RecordError::InvalidContainer("missing FLV signature".into()));
    }
    let data_offset = u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]);
    if data_offset != 9 {
        return Err(RecordError::InvalidContainer(format!("unsupported header length {}", data_offset)));
    }
    Ok(raw[4])
}

/// Forward reader over the tags of a container.
pub struct TagReader<R> {
    inner: R,
}

impl<R: Read + Seek> TagReader<R> {
    /// Validate the file header and position the reader on the first tag.
    pub fn new(mut inner: R) -> RecordResult<Self> {
        inner.seek(SeekFrom::Start(0))?;
        read_file_header(&mut inner)?;
        Ok(TagReader { inner })
    }

    /// Next complete tag, or `None` at a clean end of file.
    pub fn next_tag(&mut self) -> RecordResult<Option<Tag>> {
        let offset = self.inner.stream_position()?;
        let mut raw = [0u8; TAG_HEADER_LEN];
        if self.inner.read(&mut raw[..1])? == 0 {
            return Ok(None);
        }
        read_exact_or_malformed(&mut self.inner, &mut raw[1..], offset)?;
        let header = parse_header(&raw, offset)?;

        let mut payload = vec![0u8; header.payload_len as usize];
        read_exact_or_malformed(&mut self.inner, &mut payload, offset)?;
        let mut trailer = [0u8; TRAILER_LEN];
        read_exact_or_malformed(&mut self.inner, &mut trailer, offset)?;
        let trailing = u32::from_be_bytes(trailer);
        if trailing != header.tag_size() {
            return Err(RecordError::malformed(
                offset,
                format!("trailing size {} does not match tag size {}", trailing, header.tag_size()),
            ));
        }

        Ok(Some(Tag { tag_type: header.tag_type, timestamp: header.timestamp, payload: payload.into() }))
    }

    /// Read every remaining tag.
    pub fn read_all(&mut self) -> RecordResult<Vec<Tag>> {
        let mut tags = Vec::new();
        while let Some(tag) = self.next_tag()? {
            tags.push(tag);
        }
        Ok(tags)
    }
}

fn parse_header(raw: &[u8; TAG_HEADER_LEN], offset: u64) -> RecordResult<TagHeader> {
    // top three bits are reserved/filter flags
    let code = raw[0] & 0x1F;
    let tag_type = TagType::from_code(code)
        .ok_or_else(|| RecordError::malformed(offset, format!("unknown tag type {}", code)))?;
    let payload_len = read_u24(&raw[1..4]);
    let timestamp = read_u24(&raw[4..7]) | (raw[7] as u32) << 24;
    Ok(TagHeader { tag_type, timestamp, payload_len })
}

fn read_exact_or_malformed<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> RecordResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => RecordError::malformed(offset, "tag is truncated"),
        _ => RecordError::Io(e),
    })
}

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}

fn read_u24(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn container(tags: &[Bytes]) -> Cursor<Vec<u8>> {
        let mut data = FLV_HEADER.to_vec();
        for tag in tags {
            data.extend_from_slice(tag);
        }
        Cursor::new(data)
    }

    #[test]
    fn test_encode_layout() -> anyhow::Result<()> {
        let tag = encode_tag(TagType::Audio, 0x0102_0304, &[0xAF, 0x01, 0x55])?;
        assert_eq!(
            tag.as_ref(),
            &[8, 0, 0, 3, 0x02, 0x03, 0x04, 0x01, 0, 0, 0, 0xAF, 0x01, 0x55, 0, 0, 0, 14]
        );
        Ok(())
    }

    #[test]
    fn test_decode_round_trip_empty_payload() -> anyhow::Result<()> {
        let tag = encode_tag(TagType::Video, 40, &[])?;
        let mut cur = container(&[tag]);
        let header = decode_tag_at(&mut cur, FLV_HEADER.len() as u64)?;
        assert_eq!(header, TagHeader { tag_type: TagType::Video, timestamp: 40, payload_len: 0 });
        assert_eq!(header.tag_size(), 11);
        Ok(())
    }

    #[test]
    fn test_decode_round_trip_max_payload() -> anyhow::Result<()> {
        let payload = vec![0x5A; MAX_PAYLOAD_LEN];
        let tag = encode_tag(TagType::Audio, u32::MAX, &payload)?;
        let mut cur = container(&[tag]);
        let header = decode_tag_at(&mut cur, FLV_HEADER.len() as u64)?;
        assert_eq!(header.tag_type, TagType::Audio);
        assert_eq!(header.timestamp, u32::MAX);
        assert_eq!(header.payload_len as usize, MAX_PAYLOAD_LEN);
        Ok(())
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let result = encode_tag(TagType::Audio, 0, &payload);
        assert!(matches!(result, Err(RecordError::PayloadTooLarge(n)) if n == MAX_PAYLOAD_LEN + 1));
    }

    #[test]
    fn test_decode_rejects_size_past_eof() -> anyhow::Result<()> {
        let tag = encode_tag(TagType::Audio, 7, &[1, 2, 3, 4, 5])?;
        let mut data = FLV_HEADER.to_vec();
        data.extend_from_slice(&tag[..tag.len() - 3]);
        let mut cur = Cursor::new(data);
        let result = decode_tag_at(&mut cur, FLV_HEADER.len() as u64);
        assert!(matches!(result, Err(RecordError::MalformedTag { .. })));
        Ok(())
    }

    #[test]
    fn test_decode_rejects_offset_in_file_header() -> anyhow::Result<()> {
        let tag = encode_tag(TagType::Audio, 7, &[1])?;
        let mut cur = container(&[tag]);
        assert!(matches!(decode_tag_at(&mut cur, 9), Err(RecordError::MalformedTag { offset: 9, .. })));
        Ok(())
    }

    #[test]
    fn test_decode_rejects_unknown_type() -> anyhow::Result<()> {
        let mut tag = encode_tag(TagType::Audio, 7, &[1])?.to_vec();
        tag[0] = 3;
        let mut cur = container(&[Bytes::from(tag)]);
        let result = decode_tag_at(&mut cur, FLV_HEADER.len() as u64);
        assert!(matches!(result, Err(RecordError::MalformedTag { .. })));
        Ok(())
    }

    #[test]
    fn test_reader_preserves_order() -> anyhow::Result<()> {
        let tags = vec![
            encode_tag(TagType::Video, 0, b"v0")?,
            encode_tag(TagType::Audio, 0, b"a0")?,
            encode_tag(TagType::Audio, 23, b"a1")?,
            encode_tag(TagType::Video, 33, b"v1")?,
        ];
        let mut reader = TagReader::new(container(&tags))?;
        let read = reader.read_all()?;
        let pairs: Vec<_> = read.iter().map(|t| (t.tag_type, t.timestamp)).collect();
        assert_eq!(
            pairs,
            vec![(TagType::Video, 0), (TagType::Audio, 0), (TagType::Audio, 23), (TagType::Video, 33)]
        );
        assert_eq!(read[2].payload.as_ref(), b"a1");
        Ok(())
    }

    #[test]
    fn test_reader_reports_truncated_tail() -> anyhow::Result<()> {
        let first = encode_tag(TagType::Audio, 0, b"ok")?;
        let second = encode_tag(TagType::Audio, 20, b"cut short")?;
        let mut data = FLV_HEADER.to_vec();
        data.extend_from_slice(&first);
        data.extend_from_slice(&second[..6]);

        let mut reader = TagReader::new(Cursor::new(data))?;
        assert!(reader.next_tag()?.is_some());
        assert!(matches!(reader.next_tag(), Err(RecordError::MalformedTag { .. })));
        Ok(())
    }

    #[test]
    fn test_reader_rejects_foreign_file() {
        let result = TagReader::new(Cursor::new(b"RIFF....WAVEfmt ".to_vec()));
        assert!(matches!(result, Err(RecordError::InvalidContainer(_))));
    }
}
