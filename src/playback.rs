use crate::config::RecordConfig;
use crate::error::{RecordError, RecordResult};
use crate::flv::TagReader;
use crate::live::{PublishOrigin, Publisher, StreamHub};
use crate::media::{parse_tag, Frame, TagContent, VideoTrack};
use crate::storage::recording_path;
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Publish the stored container for `stream_id` on the hub as if it were live.
///
/// The file is opened and its header checked before this returns; tags are
/// then pushed by a spawned task, paced by their timestamps when
/// `realtime_playback` is set. The task yields the number of frames published.
pub fn publish_file(hub: &StreamHub, config: &RecordConfig, stream_id: &str) -> RecordResult<JoinHandle<RecordResult<u64>>> {
    let path = recording_path(&config.path, stream_id)?;
    let file = File::open(&path)?;
    let reader = TagReader::new(BufReader::new(file))?;
    let publisher = hub.publish_as(stream_id, PublishOrigin::Playback)?;
    tracing::info!("playing {} as stream {}", path.display(), stream_id);

    let realtime = config.realtime_playback;
    Ok(tokio::spawn(async move {
        let result = pump(reader, &publisher, realtime).await;
        match &result {
            Ok(frames) => tracing::info!("playback of {} finished after {} frames", publisher.stream_id(), frames),
            Err(e) => tracing::error!("playback of {} failed: {}", publisher.stream_id(), e),
        }
        result
    }))
}

async fn pump(mut reader: TagReader<BufReader<File>>, publisher: &Publisher, realtime: bool) -> RecordResult<u64> {
    let start = Instant::now();
    let mut base: Option<u32> = None;
    let mut audio_known = false;
    let mut video_known = false;
    let mut frames = 0u64;

    loop {
        let tag = match reader.next_tag() {
            Ok(Some(tag)) => tag,
            Ok(None) => break,
            Err(RecordError::MalformedTag { offset, reason }) => {
                // a recording cut off mid-tag is still playable up to that point
                tracing::warn!("stopping playback at offset {}: {}", offset, reason);
                break;
            }
            Err(e) => return Err(e),
        };

        let frame = match parse_tag(&tag)? {
            TagContent::AudioConfig(track) => {
                publisher.set_audio_track(track);
                audio_known = true;
                continue;
            }
            TagContent::VideoConfig(track) => {
                publisher.set_video_track(track);
                video_known = true;
                continue;
            }
            TagContent::Audio(track, frame) => {
                if !audio_known {
                    publisher.set_audio_track(track);
                    audio_known = true;
                }
                Frame::Audio(frame)
            }
            TagContent::Video(frame) => {
                if !video_known {
                    publisher.set_video_track(VideoTrack::h264(Vec::new()));
                    video_known = true;
                }
                Frame::Video(frame)
            }
            TagContent::Other => continue,
        };

        if realtime {
            let first = *base.get_or_insert(frame.timestamp());
            let due = start + Duration::from_millis(frame.timestamp().saturating_sub(first) as u64);
            tokio::time::sleep_until(due).await;
        }
        publisher.push(frame);
        frames += 1;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioCodec, AudioFrame, AudioTrack, VideoFrame};
    use crate::writer::ContainerWriter;
    use bytes::Bytes;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(root: &Path, realtime: bool) -> RecordConfig {
        RecordConfig {
            path: root.to_path_buf(),
            auto_record: false,
            auto_publish: false,
            track_timeout_ms: 500,
            realtime_playback: realtime,
        }
    }

    fn record_sample(root: &Path) -> anyhow::Result<()> {
        let path = recording_path(root, "vod/sample")?;
        let a = AudioTrack::aac(44_100, 2, vec![0x12, 0x10]);
        let v = VideoTrack::h264(vec![0x01, 0x64]);
        let mut writer = ContainerWriter::open_fresh(&path)?;
        writer.write_video_frame(&v, &VideoFrame { timestamp: 0, keyframe: true, composition_time: 0, data: Bytes::from_static(b"idr") })?;
        for ts in [0, 20, 40] {
            writer.write_audio_frame(&a, &AudioFrame { timestamp: ts, data: Bytes::from_static(b"aac") })?;
        }
        writer.close()?;
        Ok(())
    }

    #[tokio::test]
    async fn test_playback_restores_tracks_and_frames() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        record_sample(tmpdir.path())?;
        let hub = StreamHub::new();
        let cfg = config(tmpdir.path(), false);

        let task = publish_file(&hub, &cfg, "vod/sample")?;
        let mut sub = hub.subscribe("vod/sample")?;
        let audio = sub.wait_audio_track(&[AudioCodec::Aac]).await.expect("audio track");
        assert_eq!(audio.config.as_ref(), &[0x12, 0x10]);
        let video = sub.wait_video_track(&[crate::media::VideoCodec::H264]).await.expect("video track");
        assert_eq!(video.config.as_ref(), &[0x01, 0x64]);

        assert_eq!(task.await??, 4);
        let mut seen = Vec::new();
        sub.play(|frame| {
            seen.push(frame);
            Ok(())
        })
        .await?;
        let stamps: Vec<u32> = seen.iter().map(Frame::timestamp).collect();
        assert_eq!(stamps, vec![0, 0, 20, 40]);
        assert!(matches!(&seen[1], Frame::Audio(a) if a.data.as_ref() == b"aac"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_playback_is_paced() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        record_sample(tmpdir.path())?;
        let hub = StreamHub::new();

        let started = Instant::now();
        let task = publish_file(&hub, &config(tmpdir.path(), true), "vod/sample")?;
        assert_eq!(task.await??, 4);
        assert!(started.elapsed() >= Duration::from_millis(40));
        Ok(())
    }

    #[tokio::test]
    async fn test_playback_of_missing_file_fails() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let hub = StreamHub::new();
        let result = publish_file(&hub, &config(tmpdir.path(), false), "nope");
        assert!(matches!(result, Err(RecordError::Io(_))));
        assert!(!hub.is_published("nope"));
        Ok(())
    }

    #[tokio::test]
    async fn test_playback_stops_at_truncated_tail() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        record_sample(tmpdir.path())?;
        let path = recording_path(tmpdir.path(), "vod/sample")?;
        let data = std::fs::read(&path)?;
        std::fs::write(&path, &data[..data.len() - 5])?;

        let hub = StreamHub::new();
        let task = publish_file(&hub, &config(tmpdir.path(), false), "vod/sample")?;
        assert_eq!(task.await??, 3);
        Ok(())
    }
    #[tokio::test]
    async fn test_fast_playback_delivers_every_tag() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let path = recording_path(tmpdir.path(), "vod/long")?;
        let a = AudioTrack::aac(44_100, 2, vec![0x12, 0x10]);
        let mut writer = ContainerWriter::open_fresh(&path)?;
        for ts in 0..3_000u32 {
            writer.write_audio_frame(&a, &AudioFrame { timestamp: ts * 20, data: Bytes::from_static(b"aac") })?;
        }
        writer.close()?;

        let hub = StreamHub::new();
        let task = publish_file(&hub, &config(tmpdir.path(), false), "vod/long")?;
        let sub = hub.subscribe("vod/long")?;
        // the whole file is queued before anyone reads it
        assert_eq!(task.await??, 3_000);

        let mut stamps = Vec::new();
        sub.play(|frame| {
            stamps.push(frame.timestamp());
            Ok(())
        })
        .await?;
        assert_eq!(stamps, (0..3_000u32).map(|ts| ts * 20).collect::<Vec<_>>());
        Ok(())
    }
}
