use crate::error::{RecordError, RecordResult};
use crate::live::SubscriptionHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct RecordingSession {
    id: String,
    file_path: PathBuf,
    subscription: SubscriptionHandle,
    recording: bool,
    /// Set until the forwarding task has closed the file
    writer_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub filepath: PathBuf,
    pub recording: bool,
}

impl From<&RecordingSession> for SessionStatus {
    fn from(s: &RecordingSession) -> Self {
        SessionStatus { id: s.id.clone(), filepath: s.file_path.clone(), recording: s.recording }
    }
}

/// Recording sessions keyed by absolute file path.
///
/// Entries are replaced wholesale under the lock and are kept after a
/// recording stops so its status can still be queried.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<PathBuf, RecordingSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new recording for `path`. Rejected while a previous
    /// recording of the same path still holds the file open.
    pub async fn start_session(&self, stream_id: &str, path: &Path, subscription: SubscriptionHandle) -> RecordResult<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(path).is_some_and(|s| s.writer_open) {
            return Err(RecordError::AlreadyRecording(path.to_path_buf()));
        }
        sessions.insert(
            path.to_path_buf(),
            RecordingSession {
                id: stream_id.to_string(),
                file_path: path.to_path_buf(),
                subscription,
                recording: true,
                writer_open: true,
            },
        );
        Ok(())
    }

    /// Detach the subscription and flag the session stopped. The file is
    /// closed by the forwarding task once it sees the detach.
    pub async fn stop_session(&self, path: &Path) -> RecordResult<SessionStatus> {
        let mut sessions = self.sessions.lock().await;
        let current = sessions.get(path).ok_or_else(|| RecordError::NotFound(path.to_path_buf()))?;
        current.subscription.close();
        let stopped = RecordingSession { recording: false, ..current.clone() };
        let status = SessionStatus::from(&stopped);
        sessions.insert(path.to_path_buf(), stopped);
        Ok(status)
    }

    /// Called by the forwarding task after the file is closed. Ignored when
    /// the entry already belongs to a newer subscription.
    pub async fn finish_session(&self, path: &Path, subscription: &SubscriptionHandle) {
        let mut sessions = self.sessions.lock().await;
        let Some(current) = sessions.get(path) else {
            return;
        };
        if !current.subscription.same_subscription(subscription) {
            return;
        }
        let finished = RecordingSession { recording: false, writer_open: false, ..current.clone() };
        sessions.insert(path.to_path_buf(), finished);
    }

    pub async fn status(&self, path: &Path) -> Option<SessionStatus> {
        self.sessions.lock().await.get(path).map(SessionStatus::from)
    }

    pub async fn is_recording(&self, path: &Path) -> bool {
        self.sessions.lock().await.get(path).is_some_and(|s| s.recording)
    }

    pub async fn sessions(&self) -> Vec<SessionStatus> {
        let sessions = self.sessions.lock().await;
        let mut out: Vec<SessionStatus> = sessions.values().map(SessionStatus::from).collect();
        out.sort_by(|a, b| a.filepath.cmp(&b.filepath));
        out
    }
}
