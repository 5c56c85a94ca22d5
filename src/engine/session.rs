// Download session: identity, lifecycle state and the handles of its running work.

use std::path::PathBuf;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::debug;

use super::cancel::CancelToken;
use super::events::SessionId;
use crate::config::JobConfig;

/// Lifecycle of a session.
///
/// ```text
/// Pending -> Running -> Completed | Failed | Cancelled
/// Pending -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// What a session downloads and where to.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// URL (or URL prefix when `config.files` is set) to fetch from.
    pub target: String,
    /// Directory receiving the downloaded files.
    pub output_dir: PathBuf,
    pub config: JobConfig,
}

/// Point-in-time view of a session for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub state: SessionState,
    pub target: String,
    pub output_path: String,
    pub age_ms: u64,
}

pub struct Session {
    id: SessionId,
    job: DownloadJob,
    state: Mutex<SessionState>,
    cancel: CancelToken,
    operation: Mutex<Option<AbortHandle>>,
    created_at: Instant,
}

impl Session {
    pub fn new(id: SessionId, job: DownloadJob) -> Self {
        Self {
            id,
            job,
            state: Mutex::new(SessionState::Pending),
            cancel: CancelToken::new(),
            operation: Mutex::new(None),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn job(&self) -> &DownloadJob {
        &self.job
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// A handle to this session's token, for the running operation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// `Pending -> Running`. Fails if the session was cancelled before it got
    /// to start, in which case the operation must not be run.
    pub fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Pending || self.cancel.is_triggered() {
            debug!("session {} not started from state {:?}", self.id, *state);
            return false;
        }
        *state = SessionState::Running;
        true
    }

    /// Move into a terminal state. The first terminal transition wins; later
    /// ones are ignored and the winning state is returned.
    pub fn finish(&self, terminal: SessionState) -> SessionState {
        debug_assert!(terminal.is_terminal());
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = terminal;
        }
        *state
    }

    /// Trigger the token and record the cancellation.
    pub fn cancel(&self) -> SessionState {
        self.cancel.trigger();
        self.finish(SessionState::Cancelled)
    }

    pub fn attach_operation(&self, handle: AbortHandle) {
        *self.operation.lock() = Some(handle);
    }

    /// Forcefully stop the operation task. Only used on engine shutdown.
    pub fn abort_operation(&self) -> bool {
        match self.operation.lock().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            state: self.state(),
            target: self.job.target.clone(),
            output_path: self.job.output_dir.display().to_string(),
            age_ms: self.created_at.elapsed().as_millis() as u64,
        }
    }
}
