// HTTP bulk downloader: fetches a target URL, or a list of files under it,
// into the session's output directory with bounded parallelism.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::debug;

use super::progress::ProgressTracker;
use super::traits::DownloadOperation;
use crate::config::{EngineConfig, PROGRESS_LOG_BYTES, RETRY_BACKOFF_MS};
use crate::engine::cancel::CancelToken;
use crate::engine::log_adapter::{LogRecord, LogSink};
use crate::engine::session::DownloadJob;

const COMPONENT: &str = "http";

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub url: Url,
    pub dest: PathBuf,
}

/// Expand a job into the list of files it downloads.
///
/// With no `files`, the target itself is fetched and named after its last path
/// segment. Otherwise every entry is resolved relative to the target, which is
/// treated as a directory URL. Entries escaping the output directory are rejected.
pub fn plan_files(job: &DownloadJob) -> Result<Vec<FileTask>> {
    let target = job.target.trim();
    if job.config.files.is_empty() {
        let url = Url::parse(target).map_err(|e| anyhow!("invalid target url {}: {}", target, e))?;
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string();
        let dest = job.output_dir.join(safe_relative(&name)?);
        return Ok(vec![FileTask { url, dest }]);
    }

    let base = if target.ends_with('/') {
        target.to_string()
    } else {
        format!("{}/", target)
    };
    let base = Url::parse(&base).map_err(|e| anyhow!("invalid target url {}: {}", target, e))?;

    job.config
        .files
        .iter()
        .map(|file| {
            let rel = safe_relative(file)?;
            let url = base
                .join(file.trim_start_matches('/'))
                .map_err(|e| anyhow!("cannot resolve {} against {}: {}", file, base, e))?;
            Ok(FileTask {
                url,
                dest: job.output_dir.join(rel),
            })
        })
        .collect()
}

fn safe_relative(name: &str) -> Result<PathBuf> {
    let path = Path::new(name.trim_start_matches('/'));
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(anyhow!("file path escapes output directory: {}", name)),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(anyhow!("empty file path"));
    }
    Ok(out)
}

enum FileOutcome {
    Downloaded(u64),
    Skipped,
    Cancelled,
}

pub struct HttpBulkDownloader {
    client: Client,
    max_concurrency: u32,
    max_retries: u32,
}

impl HttpBulkDownloader {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_concurrency: config.max_concurrency.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn fetch_with_retry(
        client: &Client,
        task: &FileTask,
        overwrite: bool,
        max_retries: u32,
        cancel: &CancelToken,
        log: &Arc<dyn LogSink>,
        progress: &ProgressTracker,
    ) -> Result<FileOutcome> {
        if !overwrite && fs::try_exists(&task.dest).await.unwrap_or(false) {
            log.log(
                LogRecord::info(COMPONENT)
                    .with("skipping existing file")
                    .with(task.dest.display().to_string()),
            );
            return Ok(FileOutcome::Skipped);
        }

        let mut attempt = 0u32;
        loop {
            if cancel.is_triggered() {
                return Ok(FileOutcome::Cancelled);
            }

            match Self::fetch_once(client, task, cancel, log, progress).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < max_retries => {
                    log.log(
                        LogRecord::warn(COMPONENT)
                            .with(format!("fetch failed (attempt {}), retrying", attempt + 1))
                            .with(task.url.to_string())
                            .with(e),
                    );
                    let backoff = Duration::from_millis(RETRY_BACKOFF_MS * (attempt as u64 + 1));
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.triggered() => return Ok(FileOutcome::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "{} failed after {} attempts",
                        task.url,
                        attempt + 1
                    )))
                }
            }
        }
    }

    async fn fetch_once(
        client: &Client,
        task: &FileTask,
        cancel: &CancelToken,
        log: &Arc<dyn LogSink>,
        progress: &ProgressTracker,
    ) -> Result<FileOutcome> {
        let resp = tokio::select! {
            resp = client.get(task.url.clone()).send() => {
                resp.with_context(|| format!("request to {} failed", task.url))?
            }
            _ = cancel.triggered() => return Ok(FileOutcome::Cancelled),
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {} for {}", status.as_u16(), task.url));
        }

        if let Some(parent) = task.dest.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let part_path = partial_path(&task.dest);
        let mut file = fs::File::create(&part_path)
            .await
            .with_context(|| format!("cannot create {}", part_path.display()))?;

        let mut written = 0u64;
        let mut since_log = 0u64;
        let body = resp.bytes_stream();
        tokio::pin!(body);
        while let Some(chunk) = body.next().await {
            if cancel.is_triggered() {
                drop(file);
                let _ = fs::remove_file(&part_path).await;
                debug!("download of {} cancelled mid-body", task.url);
                return Ok(FileOutcome::Cancelled);
            }
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&part_path).await;
                    return Err(anyhow::Error::new(e).context(format!("reading body of {}", task.url)));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = fs::remove_file(&part_path).await;
                return Err(anyhow::Error::new(e).context(format!("writing {}", part_path.display())));
            }
            written += chunk.len() as u64;
            since_log += chunk.len() as u64;
            progress.record_bytes(chunk.len() as u64);
            if since_log >= PROGRESS_LOG_BYTES {
                since_log = 0;
                log.log(progress.snapshot().to_record(COMPONENT));
            }
        }

        file.flush().await?;
        drop(file);
        fs::rename(&part_path, &task.dest)
            .await
            .with_context(|| format!("cannot move download into {}", task.dest.display()))?;
        Ok(FileOutcome::Downloaded(written))
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[async_trait]
impl DownloadOperation for HttpBulkDownloader {
    async fn run(&self, job: DownloadJob, cancel: CancelToken, log: Arc<dyn LogSink>) -> Result<()> {
        let tasks = plan_files(&job)?;
        fs::create_dir_all(&job.output_dir)
            .await
            .with_context(|| format!("cannot create output directory {}", job.output_dir.display()))?;

        let concurrency = job
            .config
            .concurrency
            .unwrap_or(self.max_concurrency)
            .clamp(1, self.max_concurrency.max(1)) as usize;
        log.log(
            LogRecord::info(COMPONENT)
                .with("starting download")
                .with(tasks.len())
                .with("files into")
                .with(job.output_dir.display().to_string()),
        );

        let progress = Arc::new(ProgressTracker::new(tasks.len() as u64));
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut workers = JoinSet::new();

        for task in tasks {
            // Bail out of scheduling as soon as cancellation lands.
            let permit = tokio::select! {
                biased;
                _ = cancel.triggered() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| anyhow!("{}", e))?
                }
            };

            let client = self.client.clone();
            let cancel = cancel.clone();
            let log = Arc::clone(&log);
            let progress = Arc::clone(&progress);
            let overwrite = job.config.overwrite;
            let max_retries = self.max_retries;
            workers.spawn(async move {
                let _permit = permit;
                let result = Self::fetch_with_retry(
                    &client,
                    &task,
                    overwrite,
                    max_retries,
                    &cancel,
                    &log,
                    &progress,
                )
                .await;
                match &result {
                    Ok(FileOutcome::Downloaded(bytes)) => {
                        progress.record_done();
                        debug!("downloaded {} ({} bytes)", task.url, bytes);
                        log.log(progress.snapshot().to_record(COMPONENT));
                    }
                    Ok(FileOutcome::Skipped) => {
                        progress.record_skipped();
                        log.log(progress.snapshot().to_record(COMPONENT));
                    }
                    Ok(FileOutcome::Cancelled) => {}
                    Err(_) => progress.record_failed(),
                }
                result.map(|_| ())
            });
        }

        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.map_err(|e| anyhow!("download worker crashed: {}", e));
            if let Err(e) = result.and_then(|r| r) {
                log.log(LogRecord::error(COMPONENT).with("file failed").with(anyhow!("{:#}", e)));
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if cancel.is_triggered() {
            return Err(anyhow!("download cancelled"));
        }

        let snapshot = progress.snapshot();
        if let Some(e) = first_error {
            return Err(e.context(format!(
                "{} of {} files failed",
                snapshot.files_failed, snapshot.files_total
            )));
        }

        log.log(
            LogRecord::info(COMPONENT)
                .with("download finished")
                .with(snapshot.files_done)
                .with("downloaded,")
                .with(snapshot.files_skipped)
                .with("skipped,")
                .with(snapshot.bytes_downloaded)
                .with("bytes"),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;

    fn job(target: &str, files: &[&str]) -> DownloadJob {
        DownloadJob {
            target: target.to_string(),
            output_dir: PathBuf::from("/out"),
            config: JobConfig {
                files: files.iter().map(|f| f.to_string()).collect(),
                ..JobConfig::default()
            },
        }
    }

    #[test]
    fn test_plan_single_target() {
        let tasks = plan_files(&job("http://host/data/archive.zip", &[])).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].dest, PathBuf::from("/out/archive.zip"));
    }

    #[test]
    fn test_plan_target_without_name() {
        let tasks = plan_files(&job("http://host/", &[])).unwrap();
        assert_eq!(tasks[0].dest, PathBuf::from("/out/download"));
    }

    #[test]
    fn test_plan_files_joined_on_target() {
        let tasks = plan_files(&job("http://host/set", &["a.bin", "sub/b.bin"])).unwrap();
        assert_eq!(tasks[0].url.as_str(), "http://host/set/a.bin");
        assert_eq!(tasks[1].url.as_str(), "http://host/set/sub/b.bin");
        assert_eq!(tasks[1].dest, PathBuf::from("/out/sub/b.bin"));
    }

    #[test]
    fn test_plan_rejects_escaping_paths() {
        assert!(plan_files(&job("http://host/set", &["../etc/passwd"])).is_err());
    }

    #[test]
    fn test_plan_rejects_bad_url() {
        assert!(plan_files(&job("not a url", &[])).is_err());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/out/a.bin")),
            PathBuf::from("/out/a.bin.part")
        );
    }
}
