use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::cancel::CancelToken;
use crate::engine::log_adapter::LogSink;
use crate::engine::session::DownloadJob;

/// A long-running bulk download.
///
/// Implementations must poll `cancel` at their own suspension points and stop
/// issuing new work once it is triggered, and must route every log record
/// through `log`. The engine only distinguishes `Ok` from `Err`.
#[async_trait]
pub trait DownloadOperation: Send + Sync {
    async fn run(&self, job: DownloadJob, cancel: CancelToken, log: Arc<dyn LogSink>) -> Result<()>;
}
