use crate::error::{RecordError, RecordResult};
use crate::flv::{encode_tag, read_file_header, TagType, FLV_HEADER};
use crate::media::{AudioFrame, AudioTrack, Frame, VideoFrame, VideoTrack};
use crate::probe::probe_last_timestamp;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Fresh,
    /// Resuming an existing file; every timestamp is shifted by `offset_time`
    Append { offset_time: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Writing,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub audio_tags: u64,
    pub video_tags: u64,
    pub bytes_written: u64,
}

/// Sole owner of a container file for the lifetime of one recording.
///
/// Every tag reaches the file through a single `write_all` of a fully encoded
/// buffer, so the file is replayable at any point between tags.
pub struct ContainerWriter {
    path: PathBuf,
    file: Option<File>,
    mode: OpenMode,
    state: WriterState,
    audio_config_emitted: bool,
    video_config_emitted: bool,
    stats: WriterStats,
}

impl ContainerWriter {
    /// Create (or truncate) `path` and write the file header.
    pub fn open_fresh(path: &Path) -> RecordResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        file.write_all(&FLV_HEADER)?;
        Ok(Self::new(path, file, OpenMode::Fresh, FLV_HEADER.len() as u64))
    }

    /// Reopen `path` for writing after its last tag.
    ///
    /// An empty or missing file is started fresh. Otherwise the header is
    /// checked and the last recorded timestamp becomes the offset for all
    /// frames written from now on.
    pub fn open_append(path: &Path) -> RecordResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(&FLV_HEADER)?;
            return Ok(Self::new(path, file, OpenMode::Fresh, FLV_HEADER.len() as u64));
        }

        file.seek(SeekFrom::Start(0))?;
        read_file_header(&mut file)?;
        let offset_time = probe_last_timestamp(&mut file);
        file.seek(SeekFrom::End(0))?;
        tracing::debug!("appending to {} from {}ms", path.display(), offset_time);
        Ok(Self::new(path, file, OpenMode::Append { offset_time }, 0))
    }

    fn new(path: &Path, file: File, mode: OpenMode, bytes_written: u64) -> Self {
        ContainerWriter {
            path: path.to_path_buf(),
            file: Some(file),
            mode,
            state: WriterState::Open,
            audio_config_emitted: false,
            video_config_emitted: false,
            stats: WriterStats { bytes_written, ..Default::default() },
        }
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == WriterState::Closed
    }

    pub fn offset_time(&self) -> u32 {
        match self.mode {
            OpenMode::Fresh => 0,
            OpenMode::Append { offset_time } => offset_time,
        }
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn write_frame(&mut self, audio: &AudioTrack, video: &VideoTrack, frame: &Frame) -> RecordResult<()> {
        match frame {
            Frame::Audio(a) => self.write_audio_frame(audio, a),
            Frame::Video(v) => self.write_video_frame(video, v),
        }
    }

    pub fn write_audio_frame(&mut self, track: &AudioTrack, frame: &AudioFrame) -> RecordResult<()> {
        self.ensure_open()?;
        if self.mode == OpenMode::Fresh && !self.audio_config_emitted {
            if let Some(config) = track.config_payload() {
                self.write_tag(TagType::Audio, 0, &config)?;
            }
        }
        self.audio_config_emitted = true;
        let ts = frame.timestamp.wrapping_add(self.offset_time());
        self.write_tag(TagType::Audio, ts, &track.frame_payload(frame))
    }

    pub fn write_video_frame(&mut self, track: &VideoTrack, frame: &VideoFrame) -> RecordResult<()> {
        self.ensure_open()?;
        if self.mode == OpenMode::Fresh && !self.video_config_emitted {
            self.write_tag(TagType::Video, 0, &track.config_payload())?;
        }
        self.video_config_emitted = true;
        let ts = frame.timestamp.wrapping_add(self.offset_time());
        self.write_tag(TagType::Video, ts, &track.frame_payload(frame))
    }

    /// Flush and release the file. Valid once.
    pub fn close(&mut self) -> RecordResult<WriterStats> {
        let file = self.file.take().ok_or(RecordError::WriterClosed)?;
        self.state = WriterState::Closed;
        file.sync_all()?;
        Ok(self.stats.clone())
    }

    fn ensure_open(&self) -> RecordResult<()> {
        if self.is_closed() {
            return Err(RecordError::WriterClosed);
        }
        Ok(())
    }

    fn write_tag(&mut self, tag_type: TagType, timestamp: u32, payload: &[u8]) -> RecordResult<()> {
        let buf = encode_tag(tag_type, timestamp, payload)?;
        let file = self.file.as_mut().ok_or(RecordError::WriterClosed)?;
        if let Err(e) = file.write_all(&buf) {
            tracing::error!("write to {} failed, closing: {}", self.path.display(), e);
            self.file = None;
            self.state = WriterState::Closed;
            return Err(e.into());
        }
        self.state = WriterState::Writing;
        self.stats.bytes_written += buf.len() as u64;
        match tag_type {
            TagType::Audio => self.stats.audio_tags += 1,
            TagType::Video => self.stats.video_tags += 1,
            TagType::Script => {}
        }
        Ok(())
    }
}
