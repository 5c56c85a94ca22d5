// Per-session download progress: file counts, byte totals and throughput.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::engine::log_adapter::LogRecord;

struct RateSample {
    at: Instant,
    bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub files_total: u64,
    pub files_done: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub bytes_downloaded: u64,
    pub bytes_per_sec: u64,
}

impl ProgressSnapshot {
    /// Files that reached any final outcome.
    pub fn files_settled(&self) -> u64 {
        self.files_done + self.files_skipped + self.files_failed
    }

    /// Log record consumed by observers to drive a progress display.
    pub fn to_record(&self, component: &str) -> LogRecord {
        LogRecord::info(component)
            .with("progress")
            .with(self.files_settled())
            .with(self.files_total)
            .with(serde_json::json!({
                "done": self.files_done,
                "skipped": self.files_skipped,
                "failed": self.files_failed,
                "bytes": self.bytes_downloaded,
                "bytesPerSec": self.bytes_per_sec,
            }))
    }
}

pub struct ProgressTracker {
    files_total: u64,
    files_done: AtomicU64,
    files_skipped: AtomicU64,
    files_failed: AtomicU64,
    bytes_downloaded: AtomicU64,
    last_sample: Mutex<RateSample>,
}

impl ProgressTracker {
    pub fn new(files_total: u64) -> Self {
        Self {
            files_total,
            files_done: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            last_sample: Mutex::new(RateSample {
                at: Instant::now(),
                bytes: 0,
            }),
        }
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_done(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = Instant::now();
        let bytes = self.bytes_downloaded.load(Ordering::Relaxed);

        let bytes_per_sec = {
            let mut sample = self.last_sample.lock();
            let elapsed = now.duration_since(sample.at).as_secs_f64();
            let bps = if elapsed > 0.1 {
                (bytes.saturating_sub(sample.bytes) as f64 / elapsed) as u64
            } else {
                0
            };
            if elapsed > 0.1 {
                sample.at = now;
                sample.bytes = bytes;
            }
            bps
        };

        ProgressSnapshot {
            files_total: self.files_total,
            files_done: self.files_done.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_downloaded: bytes,
            bytes_per_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let progress = ProgressTracker::new(4);
        progress.record_bytes(1000);
        progress.record_bytes(24);
        progress.record_done();
        progress.record_skipped();
        progress.record_failed();

        let snap = progress.snapshot();
        assert_eq!(snap.files_total, 4);
        assert_eq!(snap.files_settled(), 3);
        assert_eq!(snap.bytes_downloaded, 1024);
        assert_eq!(progress.failed(), 1);
    }

    #[test]
    fn test_progress_record_shape() {
        let progress = ProgressTracker::new(2);
        progress.record_done();
        let record = progress.snapshot().to_record("http");
        assert_eq!(record.component, "http");
        assert_eq!(record.parts.len(), 4);
    }
}
