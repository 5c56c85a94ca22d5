// Session orchestration: creates, starts, cancels and finalizes download sessions.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinError;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::bus::{EventBus, Subscription};
use super::events::{Event, SessionId};
use super::log_adapter::{EventLogAdapter, LogRecord, LogSink};
use super::registry::SessionRegistry;
use super::session::{DownloadJob, Session, SessionInfo, SessionState};
use crate::config::JobConfig;
use crate::detect::path::{self, PathValidation};
use crate::error::SessionError;
use crate::source::traits::DownloadOperation;

/// Body of a create-session request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateRequest {
    pub target: Option<String>,
    pub output_path: Option<String>,
    pub config: JobConfig,
}

impl CreateRequest {
    pub fn new(target: impl Into<String>, output_path: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            output_path: Some(output_path.into()),
            config: JobConfig::default(),
        }
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, SessionError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(SessionError::MissingField(field)),
    }
}

/// Owner of the session registry and event bus.
///
/// Not a singleton: every manager has its own registry, so tests can run
/// independent instances side by side.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    bus: EventBus,
    operation: Arc<dyn DownloadOperation>,
    tracker: TaskTracker,
    accepting: AtomicBool,
}

impl SessionManager {
    pub fn new(operation: Arc<dyn DownloadOperation>) -> Self {
        Self::with_bus(operation, EventBus::new())
    }

    pub fn with_bus(operation: Arc<dyn DownloadOperation>, bus: EventBus) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            bus,
            operation,
            tracker: TaskTracker::new(),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Open a live channel receiving events of every session.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Register a new session and start it in the background.
    ///
    /// Returns as soon as the session is registered as `Pending`; the
    /// operation's outcome arrives later as a terminal event. An unusable
    /// output path is only reported (see [`SessionManager::validate_path`]),
    /// the operation gets to try creating it.
    pub fn create(&self, request: CreateRequest) -> Result<SessionId, SessionError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SessionError::ShuttingDown);
        }
        let target = required(request.target, "target")?;
        let output_path = required(request.output_path, "outputPath")?;
        if output_path.contains('\0') {
            return Err(SessionError::MalformedPath {
                reason: "path contains a NUL character".to_string(),
            });
        }

        let validation = path::validate(&output_path);
        if !validation.valid {
            warn!(
                "output path {} not ready ({}); the download will try to create it",
                output_path, validation.message
            );
        }

        let job = DownloadJob {
            target,
            output_dir: PathBuf::from(&output_path),
            config: request.config,
        };
        // Ids are random; a collision only costs another draw.
        let session = loop {
            let candidate = Arc::new(Session::new(SessionId::generate(), job.clone()));
            if self.registry.insert(Arc::clone(&candidate)) {
                break candidate;
            }
        };
        let id = session.id().clone();

        // Shutdown may have drained the registry between the check above and
        // the insert. Such a session must not start.
        if !self.accepting.load(Ordering::Acquire) {
            if self.registry.take(&id).is_some() {
                session.cancel();
            }
            debug!("session {} refused, engine shutting down", id);
            return Err(SessionError::ShuttingDown);
        }
        info!(
            "session {} created: target={} output={}",
            id,
            session.job().target,
            output_path
        );

        self.tracker.spawn(drive_session(
            session,
            Arc::clone(&self.registry),
            self.bus.clone(),
            Arc::clone(&self.operation),
        ));
        Ok(id)
    }

    /// Cancel a live session. Returns `false` if it is unknown or already
    /// finished; a second cancel of the same id therefore returns `false`.
    ///
    /// Does not wait for the operation to stop.
    pub fn cancel(&self, id: &SessionId) -> bool {
        let Some(session) = self.registry.take(id) else {
            debug!("cancel for unknown session {}", id);
            return false;
        };
        session.cancel();
        info!("session {} cancelled", id);
        self.bus
            .publish(Event::cancelled(id.clone(), "Download cancelled"));
        true
    }

    /// Like [`SessionManager::cancel`], but as a `Result` for callers that
    /// propagate errors.
    pub fn try_cancel(&self, id: &SessionId) -> Result<(), SessionError> {
        if self.cancel(id) {
            Ok(())
        } else {
            Err(SessionError::NotFound(id.clone()))
        }
    }

    /// Ids of live sessions at this instant.
    pub fn list(&self) -> Vec<SessionId> {
        self.registry.ids()
    }

    pub fn status(&self, id: &SessionId) -> Option<SessionInfo> {
        self.registry.get(id).map(|s| s.info())
    }

    /// Advisory check of an output location.
    pub fn validate_path(&self, raw: &str) -> PathValidation {
        path::validate(raw)
    }

    /// Stop accepting sessions, cancel every live one and wait up to `grace`
    /// for their tasks to wind down. Operations still running after that are
    /// aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);
        let sessions = self.registry.drain();
        for session in &sessions {
            session.cancel();
            self.bus
                .publish(Event::cancelled(session.id().clone(), "Engine shutting down"));
        }
        info!("shutdown: cancelled {} live sessions", sessions.len());

        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            for session in &sessions {
                if session.abort_operation() {
                    warn!("session {} did not stop within grace period, aborting", session.id());
                }
            }
            self.tracker.wait().await;
        }
        info!("shutdown complete");
    }
}

/// Background continuation of one session: start, await the operation, finalize.
async fn drive_session(
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    bus: EventBus,
    operation: Arc<dyn DownloadOperation>,
) {
    if !session.begin() {
        return;
    }
    let id = session.id().clone();
    debug!("session {} running", id);

    let sink: Arc<dyn LogSink> = Arc::new(EventLogAdapter::new(id.clone(), bus.clone()));
    let job = session.job().clone();
    let token = session.cancel_token();
    let op_sink = Arc::clone(&sink);
    let handle = tokio::spawn(async move { operation.run(job, token, op_sink).await });
    session.attach_operation(handle.abort_handle());

    let outcome = handle.await;
    finalize(&id, outcome, &registry, &bus, sink.as_ref());
}

/// Terminal transition. Only the path that takes the session out of the
/// registry may report an outcome; a cancel that got there first wins.
///
/// Cancel and shutdown both take the session before triggering its token, so
/// an outcome reaching this point was never cancelled.
fn finalize(
    id: &SessionId,
    outcome: Result<anyhow::Result<()>, JoinError>,
    registry: &SessionRegistry,
    bus: &EventBus,
    sink: &dyn LogSink,
) {
    let Some(session) = registry.take(id) else {
        debug!("session {} already cancelled, dropping its outcome", id);
        return;
    };

    let (state, event) = match outcome {
        Ok(Ok(())) => (
            SessionState::Completed,
            Event::completed(id.clone(), "Download completed"),
        ),
        Ok(Err(e)) => {
            let summary = format!("{:#}", e);
            sink.log(LogRecord::error("session").with("download failed").with(e));
            (SessionState::Failed, Event::failed(id.clone(), summary))
        }
        Err(join_err) if join_err.is_panic() => {
            let summary = "Download crashed unexpectedly".to_string();
            sink.log(LogRecord::error("session").with(summary.clone()));
            (SessionState::Failed, Event::failed(id.clone(), summary))
        }
        Err(_) => (
            SessionState::Cancelled,
            Event::cancelled(id.clone(), "Download aborted"),
        ),
    };

    let state = session.finish(state);
    info!("session {} finished: {:?}", id, state);
    bus.publish(event);
}
