// Output directory probing: decides whether a path can receive a download.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Raw filesystem facts about a path and its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFacts {
    pub path: PathBuf,
    pub exists: bool,
    pub is_directory: bool,
    /// For a missing path this is the parent's writability.
    pub writable: bool,
    pub parent_exists: bool,
    pub parent_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Ready,
    NotWritable,
    NotADirectory,
    WillBeCreated,
    ParentMissing,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathValidation {
    pub valid: bool,
    pub exists: bool,
    pub is_directory: bool,
    pub writable: bool,
    pub parent_exists: bool,
    pub parent_path: Option<String>,
    pub status: PathStatus,
    pub message: String,
}

impl PathValidation {
    fn invalid(message: String) -> Self {
        Self {
            valid: false,
            exists: false,
            is_directory: false,
            writable: false,
            parent_exists: false,
            parent_path: None,
            status: PathStatus::Invalid,
            message,
        }
    }
}

/// Probe a path. Only `NotFound` is treated as "absent"; any other probing
/// error is returned to the caller.
pub fn check_path(path: &Path) -> io::Result<PathFacts> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let parent_path = path.parent().map(Path::to_path_buf);

    let parent_exists = match &parent_path {
        Some(parent) => is_existing_dir(parent)?,
        None => false,
    };

    match std::fs::metadata(&path) {
        Ok(meta) => {
            let is_directory = meta.is_dir();
            let writable = is_directory && dir_writable(&path);
            Ok(PathFacts {
                path,
                exists: true,
                is_directory,
                writable,
                parent_exists,
                parent_path,
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let writable = match &parent_path {
                Some(parent) if parent_exists => dir_writable(parent),
                _ => false,
            };
            Ok(PathFacts {
                path,
                exists: false,
                is_directory: false,
                writable,
                parent_exists,
                parent_path,
            })
        }
        Err(e) => Err(e),
    }
}

fn is_existing_dir(path: &Path) -> io::Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Writability is checked by actually creating (and dropping) a temp file.
fn dir_writable(dir: &Path) -> bool {
    tempfile::Builder::new()
        .prefix(".bulk-dl-probe")
        .tempfile_in(dir)
        .is_ok()
}

/// Validate a user-supplied output location. Never fails; probing problems
/// yield `valid == false` with an explanation.
pub fn validate(raw: &str) -> PathValidation {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return PathValidation::invalid("Path is empty".to_string());
    }
    if trimmed.contains('\0') {
        return PathValidation::invalid("Path contains a NUL character".to_string());
    }

    let facts = match check_path(Path::new(trimmed)) {
        Ok(facts) => facts,
        Err(e) => return PathValidation::invalid(format!("Cannot access path: {}", e)),
    };
    classify(&facts)
}

/// Apply the decision table to probed facts.
pub fn classify(facts: &PathFacts) -> PathValidation {
    let (valid, status, message) = match (facts.exists, facts.is_directory, facts.writable) {
        (true, true, true) => (true, PathStatus::Ready, "Directory exists and is writable".to_string()),
        (true, true, false) => (
            false,
            PathStatus::NotWritable,
            "Directory exists but is not writable".to_string(),
        ),
        (true, false, _) => (
            false,
            PathStatus::NotADirectory,
            "Path exists but is not a directory".to_string(),
        ),
        (false, _, _) if facts.parent_exists => {
            let mut message = "Directory will be created".to_string();
            if !facts.writable {
                message.push_str(" (parent directory may not be writable)");
            }
            (true, PathStatus::WillBeCreated, message)
        }
        (false, _, _) => (
            false,
            PathStatus::ParentMissing,
            match &facts.parent_path {
                Some(parent) => format!("Parent directory {} does not exist", parent.display()),
                None => "Path has no parent directory".to_string(),
            },
        ),
    };

    PathValidation {
        valid,
        exists: facts.exists,
        is_directory: facts.is_directory,
        writable: facts.writable,
        parent_exists: facts.parent_exists,
        parent_path: facts.parent_path.as_ref().map(|p| p.display().to_string()),
        status,
        message,
    }
}
