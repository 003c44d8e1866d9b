//! Frames and negotiated tracks, and how each codec is framed inside a tag payload.

use crate::error::{RecordError, RecordResult};
use crate::flv::{Tag, TagType};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::fmt;

const SOUND_FORMAT_PCMA: u8 = 7;
const SOUND_FORMAT_PCMU: u8 = 8;
const SOUND_FORMAT_AAC: u8 = 10;
const VIDEO_CODEC_H264: u8 = 7;

const PACKET_SEQUENCE_HEADER: u8 = 0;
const PACKET_DATA: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Pcma,
    Pcmu,
}

impl AudioCodec {
    fn sound_format(self) -> u8 {
        match self {
            AudioCodec::Aac => SOUND_FORMAT_AAC,
            AudioCodec::Pcma => SOUND_FORMAT_PCMA,
            AudioCodec::Pcmu => SOUND_FORMAT_PCMU,
        }
    }

    fn from_sound_format(format: u8) -> Option<Self> {
        match format {
            SOUND_FORMAT_AAC => Some(AudioCodec::Aac),
            SOUND_FORMAT_PCMA => Some(AudioCodec::Pcma),
            SOUND_FORMAT_PCMU => Some(AudioCodec::Pcmu),
            _ => None,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::Aac => write!(f, "aac"),
            AudioCodec::Pcma => write!(f, "pcma"),
            AudioCodec::Pcmu => write!(f, "pcmu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub sample_bits: u8,
    pub channels: u8,
    /// AudioSpecificConfig for AAC, empty otherwise
    pub config: Bytes,
}

impl AudioTrack {
    pub fn aac(sample_rate: u32, channels: u8, config: impl Into<Bytes>) -> Self {
        AudioTrack { codec: AudioCodec::Aac, sample_rate, sample_bits: 16, channels, config: config.into() }
    }

    pub fn g711(codec: AudioCodec, sample_rate: u32, channels: u8) -> Self {
        AudioTrack { codec, sample_rate, sample_bits: 16, channels, config: Bytes::new() }
    }

    /// The first payload byte of every audio tag on this track.
    pub fn tag_byte(&self) -> u8 {
        if self.codec == AudioCodec::Aac {
            // AAC is always signalled as 44kHz, 16-bit, stereo
            return SOUND_FORMAT_AAC << 4 | 0x0F;
        }
        let rate: u8 = match self.sample_rate {
            0..=5_512 => 0,
            5_513..=11_025 => 1,
            11_026..=22_050 => 2,
            _ => 3,
        };
        let size = u8::from(self.sample_bits > 8);
        let stereo = u8::from(self.channels > 1);
        self.codec.sound_format() << 4 | rate << 2 | size << 1 | stereo
    }

    pub fn requires_config_record(&self) -> bool {
        self.codec == AudioCodec::Aac
    }

    /// Payload of the sequence header tag, if the codec has one.
    pub fn config_payload(&self) -> Option<Bytes> {
        if !self.requires_config_record() {
            return None;
        }
        let mut buf = BytesMut::with_capacity(2 + self.config.len());
        buf.put_u8(self.tag_byte());
        buf.put_u8(PACKET_SEQUENCE_HEADER);
        buf.put_slice(&self.config);
        Some(buf.freeze())
    }

    pub fn frame_payload(&self, frame: &AudioFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + frame.data.len());
        buf.put_u8(self.tag_byte());
        if self.codec == AudioCodec::Aac {
            buf.put_u8(PACKET_DATA);
        }
        buf.put_slice(&frame.data);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrack {
    pub codec: VideoCodec,
    /// AVCDecoderConfigurationRecord
    pub config: Bytes,
}

impl VideoTrack {
    pub fn h264(config: impl Into<Bytes>) -> Self {
        VideoTrack { codec: VideoCodec::H264, config: config.into() }
    }

    pub fn config_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.config.len());
        buf.put_u8(1 << 4 | VIDEO_CODEC_H264);
        buf.put_u8(PACKET_SEQUENCE_HEADER);
        buf.put_slice(&[0, 0, 0]);
        buf.put_slice(&self.config);
        buf.freeze()
    }

    pub fn frame_payload(&self, frame: &VideoFrame) -> Bytes {
        let frame_type: u8 = if frame.keyframe { 1 } else { 2 };
        let cts = frame.composition_time;
        let mut buf = BytesMut::with_capacity(5 + frame.data.len());
        buf.put_u8(frame_type << 4 | VIDEO_CODEC_H264);
        buf.put_u8(PACKET_DATA);
        buf.put_slice(&[(cts >> 16) as u8, (cts >> 8) as u8, cts as u8]);
        buf.put_slice(&frame.data);
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub timestamp: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub timestamp: u32,
    pub keyframe: bool,
    /// Presentation offset from `timestamp`, 24 bits on disk
    pub composition_time: u32,
    /// Length-prefixed NAL units
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl Frame {
    pub fn timestamp(&self) -> u32 {
        match self {
            Frame::Audio(a) => a.timestamp,
            Frame::Video(v) => v.timestamp,
        }
    }
}

/// A tag read back from a container, classified by what it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagContent {
    AudioConfig(AudioTrack),
    Audio(AudioTrack, AudioFrame),
    VideoConfig(VideoTrack),
    Video(VideoFrame),
    /// Script data or codecs this recorder does not carry
    Other,
}

/// Parse the codec framing of a tag written by this recorder or a compatible muxer.
pub fn parse_tag(tag: &Tag) -> RecordResult<TagContent> {
    let p = &tag.payload;
    match tag.tag_type {
        TagType::Script => Ok(TagContent::Other),
        TagType::Audio => {
            let first = *p.first().ok_or_else(|| RecordError::malformed(0, "empty audio tag"))?;
            let Some(codec) = AudioCodec::from_sound_format(first >> 4) else {
                return Ok(TagContent::Other);
            };
            let sample_rate = [5_512, 11_025, 22_050, 44_100][((first >> 2) & 0x03) as usize];
            let sample_bits = if first & 0x02 != 0 { 16 } else { 8 };
            let channels = if first & 0x01 != 0 { 2 } else { 1 };
            let mut track = AudioTrack { codec, sample_rate, sample_bits, channels, config: Bytes::new() };
            if codec == AudioCodec::Aac {
                let packet = *p.get(1).ok_or_else(|| RecordError::malformed(0, "AAC tag without packet type"))?;
                if packet == PACKET_SEQUENCE_HEADER {
                    track.config = p.slice(2..);
                    return Ok(TagContent::AudioConfig(track));
                }
                let frame = AudioFrame { timestamp: tag.timestamp, data: p.slice(2..) };
                return Ok(TagContent::Audio(track, frame));
            }
            let frame = AudioFrame { timestamp: tag.timestamp, data: p.slice(1..) };
            Ok(TagContent::Audio(track, frame))
        }
        TagType::Video => {
            if p.len() < 5 {
                return Err(RecordError::malformed(0, "video tag shorter than its framing"));
            }
            if p[0] & 0x0F != VIDEO_CODEC_H264 {
                return Ok(TagContent::Other);
            }
            if p[1] == PACKET_SEQUENCE_HEADER {
                return Ok(TagContent::VideoConfig(VideoTrack::h264(p.slice(5..))));
            }
            let composition_time = (p[2] as u32) << 16 | (p[3] as u32) << 8 | p[4] as u32;
            Ok(TagContent::Video(VideoFrame {
                timestamp: tag.timestamp,
                keyframe: p[0] >> 4 == 1,
                composition_time,
                data: p.slice(5..),
            }))
        }
    }
}
