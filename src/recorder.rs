use crate::config::RecordConfig;
use crate::error::{RecordError, RecordResult};
use crate::live::{PlayOutcome, StreamHub, Subscription};
use crate::media::{AudioCodec, AudioTrack, VideoCodec, VideoTrack};
use crate::session::SessionRegistry;
use crate::storage::recording_path;
use crate::writer::{ContainerWriter, WriterStats};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const ACCEPTED_AUDIO: [AudioCodec; 3] = [AudioCodec::Aac, AudioCodec::Pcma, AudioCodec::Pcmu];
pub const ACCEPTED_VIDEO: [VideoCodec; 1] = [VideoCodec::H264];

/// Everything a recording needs, shared by all recordings
#[derive(Clone)]
pub struct RecordContext {
    pub config: Arc<RecordConfig>,
    pub hub: StreamHub,
    pub registry: SessionRegistry,
}

/// A running recording. Dropping `task` leaves the recording running.
pub struct Recording {
    pub stream_id: String,
    pub path: PathBuf,
    pub task: JoinHandle<RecordResult<WriterStats>>,
}

/// Subscribe to `stream_id` and record it into `root/<stream_id>.flv`.
///
/// Returns once the file is open and both tracks are negotiated; frames are
/// then written by a spawned task until the stream ends or the session is
/// stopped.
pub async fn start_recording(ctx: &RecordContext, stream_id: &str, append: bool) -> RecordResult<Recording> {
    let path = recording_path(&ctx.config.path, stream_id)?;
    if ctx.registry.is_recording(&path).await {
        return Err(RecordError::AlreadyRecording(path));
    }

    let mut subscription = ctx.hub.subscribe(stream_id)?;
    let handle = subscription.handle();
    ctx.registry.start_session(stream_id, &path, handle.clone()).await?;

    let opened = if append { ContainerWriter::open_append(&path) } else { ContainerWriter::open_fresh(&path) };
    let mut writer = match opened {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("cannot open {}: {}", path.display(), e);
            ctx.registry.finish_session(&path, &handle).await;
            return Err(e);
        }
    };

    let negotiated = tokio::time::timeout(ctx.config.track_timeout(), negotiate(&mut subscription)).await;
    let (audio, video) = match negotiated {
        Ok(Some(tracks)) => tracks,
        outcome => {
            let reason = if outcome.is_err() { "timed out waiting for tracks" } else { "stream ended before tracks were available" };
            tracing::warn!("not recording {}: {}", stream_id, reason);
            if let Err(e) = writer.close() {
                tracing::warn!("closing {} failed: {}", path.display(), e);
            }
            ctx.registry.finish_session(&path, &handle).await;
            return Err(RecordError::TrackNegotiation { stream: stream_id.to_string(), reason: reason.to_string() });
        }
    };

    tracing::info!(
        "recording {} to {} (audio {}, video {}, offset {}ms)",
        stream_id,
        path.display(),
        audio.codec,
        video.codec,
        writer.offset_time()
    );

    let registry = ctx.registry.clone();
    let task_path = path.clone();
    let task_stream = stream_id.to_string();
    let task = tokio::spawn(async move {
        let played = subscription.play(|frame| writer.write_frame(&audio, &video, &frame)).await;
        let closed = if writer.is_closed() { Ok(writer.stats().clone()) } else { writer.close() };
        registry.finish_session(&task_path, &handle).await;

        match (played, closed) {
            (Ok(outcome), Ok(stats)) => {
                let why = match outcome {
                    PlayOutcome::Ended => "stream ended",
                    PlayOutcome::Detached => "stopped",
                };
                tracing::info!(
                    "recording {} finished ({}): {} audio / {} video tags, {} bytes",
                    task_stream,
                    why,
                    stats.audio_tags,
                    stats.video_tags,
                    stats.bytes_written
                );
                Ok(stats)
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("recording {} failed: {}", task_stream, e);
                Err(e)
            }
        }
    });

    Ok(Recording { stream_id: stream_id.to_string(), path, task })
}

async fn negotiate(subscription: &mut Subscription) -> Option<(AudioTrack, VideoTrack)> {
    let audio = subscription.wait_audio_track(&ACCEPTED_AUDIO).await?;
    let video = subscription.wait_video_track(&ACCEPTED_VIDEO).await?;
    Some((audio, video))
}
