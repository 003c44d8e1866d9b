//! Control surface: record, stop, status, list, delete and play, all addressed
//! by stream id and keyed internally by the recording's absolute path.

use crate::config::RecordConfig;
use crate::error::{RecordError, RecordResult};
use crate::live::{PublishOrigin, StreamHooks, StreamHub};
use crate::playback::publish_file;
use crate::recorder::{start_recording, RecordContext, Recording};
use crate::session::{SessionRegistry, SessionStatus};
use crate::storage::{self, recording_path, FileInfo};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct RecordService {
    ctx: RecordContext,
}

impl RecordService {
    /// Create the recordings root and install the auto-record/auto-publish
    /// hooks on `hub`.
    pub fn new(config: RecordConfig, hub: StreamHub) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        let config = Arc::new(config);
        let registry = SessionRegistry::new();
        hub.set_hooks(Arc::new(AutoHooks { config: config.clone(), registry: registry.clone() }));
        Ok(RecordService { ctx: RecordContext { config, hub, registry } })
    }

    pub fn hub(&self) -> &StreamHub {
        &self.ctx.hub
    }

    pub async fn start(&self, stream_id: &str, append: bool) -> RecordResult<Recording> {
        start_recording(&self.ctx, stream_id, append).await
    }

    pub async fn stop(&self, stream_id: &str) -> RecordResult<SessionStatus> {
        let path = recording_path(&self.ctx.config.path, stream_id)?;
        let status = self.ctx.registry.stop_session(&path).await?;
        tracing::info!("stop requested for {}", stream_id);
        Ok(status)
    }

    pub async fn status(&self, stream_id: &str) -> RecordResult<Option<SessionStatus>> {
        let path = recording_path(&self.ctx.config.path, stream_id)?;
        Ok(self.ctx.registry.status(&path).await)
    }

    pub async fn sessions(&self) -> Vec<SessionStatus> {
        self.ctx.registry.sessions().await
    }

    pub async fn list(&self) -> RecordResult<Vec<FileInfo>> {
        storage::list_recordings(&self.ctx.config.path).await
    }

    /// Delete a stored recording. Refused while it is being written.
    pub async fn delete(&self, stream_id: &str) -> RecordResult<PathBuf> {
        let path = recording_path(&self.ctx.config.path, stream_id)?;
        if self.ctx.registry.is_recording(&path).await {
            return Err(RecordError::AlreadyRecording(path));
        }
        storage::delete_recording(&self.ctx.config.path, stream_id).await
    }

    pub fn play(&self, stream_id: &str) -> RecordResult<JoinHandle<RecordResult<u64>>> {
        publish_file(&self.ctx.hub, &self.ctx.config, stream_id)
    }
}

struct AutoHooks {
    config: Arc<RecordConfig>,
    registry: SessionRegistry,
}

impl StreamHooks for AutoHooks {
    fn on_publish(&self, hub: &StreamHub, stream_id: &str, origin: PublishOrigin) {
        if !self.config.auto_record {
            return;
        }
        // recording a replay would truncate the file being read
        if origin == PublishOrigin::Playback {
            tracing::debug!("not auto-recording replay of {}", stream_id);
            return;
        }
        let ctx = RecordContext { config: self.config.clone(), hub: hub.clone(), registry: self.registry.clone() };
        let stream_id = stream_id.to_string();
        tokio::spawn(async move {
            match start_recording(&ctx, &stream_id, false).await {
                Ok(recording) => tracing::info!("auto-recording {} to {}", stream_id, recording.path.display()),
                Err(e) => tracing::warn!("auto-record of {} failed: {}", stream_id, e),
            }
        });
    }

    fn on_subscribe(&self, hub: &StreamHub, stream_id: &str, has_publisher: bool) {
        if !self.config.auto_publish || has_publisher {
            return;
        }
        match recording_path(&self.config.path, stream_id) {
            Ok(path) if path.exists() => {
                if let Err(e) = publish_file(hub, &self.config, stream_id) {
                    tracing::warn!("auto-publish of {} failed: {}", stream_id, e);
                }
            }
            _ => {}
        }
    }
}
