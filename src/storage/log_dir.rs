// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory-per-namespace backend on local disk.
//!
//! ```text
//! <root>/
//!   services/
//!     records.jsonl   one {"key":..,"value":..} object per line, append-only
//!     FINISHED        written by finish(), removed when reopened for write
//! ```
//!
//! A read-mode open loads the whole log into memory. Opening a directory
//! that has records but no `FINISHED` marker for reading fails with
//! [`BackendError::NotFinished`]; that is the state a writer leaves behind
//! when it dies without finalizing.
//!
//! A failed append truncates the log back to its last complete record. A
//! torn final line left by a crash is skipped on read and cut off by the
//! next write-mode open.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::traits::{Backend, BackendError, BackendHandle, OpenMode};

const RECORDS_FILE: &str = "records.jsonl";
const FINISHED_MARKER: &str = "FINISHED";

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
}

/// Backend rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LogDirBackend {
    root: PathBuf,
}

impl LogDirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, BackendError> {
        let valid = !namespace.is_empty()
            && namespace != "."
            && namespace != ".."
            && !namespace.contains(['/', '\\']);
        if !valid {
            return Err(BackendError::Open {
                namespace: namespace.to_string(),
                reason: "namespace is not a valid directory name".to_string(),
            });
        }
        Ok(self.root.join(namespace))
    }

    async fn open_write(&self, namespace: &str, dir: PathBuf) -> Result<LogDirHandle, BackendError> {
        tokio::fs::create_dir_all(&dir).await?;
        match tokio::fs::remove_file(dir.join(FINISHED_MARKER)).await {
            Ok(()) => debug!(namespace, "Reopened finished directory for write"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let records_path = dir.join(RECORDS_FILE);
        if trim_torn_tail(&records_path).await? {
            warn!(namespace, "Dropped torn final record left by a previous writer");
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&records_path)
            .await?;

        Ok(LogDirHandle {
            namespace: namespace.to_string(),
            dir,
            mode: OpenMode::Write,
            writer: tokio::sync::Mutex::new(Some(file)),
            index: HashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn open_read(&self, namespace: &str, dir: PathBuf) -> Result<LogDirHandle, BackendError> {
        let records_path = dir.join(RECORDS_FILE);
        let contents = match tokio::fs::read_to_string(&records_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        if !contents.is_empty() && !tokio::fs::try_exists(dir.join(FINISHED_MARKER)).await? {
            return Err(BackendError::NotFinished { namespace: namespace.to_string() });
        }

        let mut index: HashMap<String, Vec<String>> = HashMap::new();
        let torn_tail = !contents.ends_with('\n');
        let line_count = contents.lines().count();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<Record>(line);
            if parsed.is_err() && torn_tail && line_no + 1 == line_count {
                warn!(namespace, line = line_no + 1, "Skipping torn final record");
                break;
            }
            let record = parsed.map_err(|e| {
                BackendError::Backend(format!(
                    "corrupt record at {}:{}: {}",
                    records_path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            index.entry(record.key).or_default().push(record.value);
        }
        info!(namespace, keys = index.len(), "Loaded namespace directory for read");

        Ok(LogDirHandle {
            namespace: namespace.to_string(),
            dir,
            mode: OpenMode::Read,
            writer: tokio::sync::Mutex::new(None),
            index,
            closed: AtomicBool::new(false),
        })
    }
}

/// Cut everything after the last newline. Returns `true` if bytes were cut.
async fn trim_torn_tail(path: &Path) -> Result<bool, BackendError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(false);
    }
    let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    Ok(true)
}

#[async_trait]
impl Backend for LogDirBackend {
    async fn open(&self, namespace: &str, mode: OpenMode) -> Result<Arc<dyn BackendHandle>, BackendError> {
        let dir = self.namespace_dir(namespace)?;
        let handle = match mode {
            OpenMode::Write => self.open_write(namespace, dir).await?,
            OpenMode::Read => self.open_read(namespace, dir).await?,
        };
        Ok(Arc::new(handle))
    }
}

struct LogDirHandle {
    namespace: String,
    dir: PathBuf,
    mode: OpenMode,
    writer: tokio::sync::Mutex<Option<tokio::fs::File>>,
    /// Read mode only: values per key in log order
    index: HashMap<String, Vec<String>>,
    closed: AtomicBool,
}

impl LogDirHandle {
    fn check(&self, required: OpenMode) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed { namespace: self.namespace.clone() });
        }
        if self.mode != required {
            return Err(BackendError::WrongMode {
                namespace: self.namespace.clone(),
                mode: self.mode,
            });
        }
        Ok(())
    }

    fn closed_error(&self) -> BackendError {
        BackendError::Closed { namespace: self.namespace.clone() }
    }
}

#[async_trait]
impl BackendHandle for LogDirHandle {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    async fn append(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.check(OpenMode::Write)?;
        let mut line = serde_json::to_string(&Record {
            key: key.to_string(),
            value: value.to_string(),
        })
        .map_err(|e| BackendError::Backend(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let file = writer.as_mut().ok_or_else(|| self.closed_error())?;
        let committed = file.metadata().await?.len();
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Cut a partial line off so the retry starts on a clean boundary
            if let Err(truncate) = file.set_len(committed).await {
                warn!(namespace = %self.namespace, error = %truncate, "Failed to truncate torn record");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check(OpenMode::Read)?;
        Ok(self.index.get(key).map(|values| values.concat()))
    }

    async fn finish(&self) -> Result<(), BackendError> {
        self.check(OpenMode::Write)?;
        let mut writer = self.writer.lock().await;
        let file = writer.as_mut().ok_or_else(|| self.closed_error())?;
        file.flush().await?;
        file.sync_all().await?;
        tokio::fs::write(self.dir.join(FINISHED_MARKER), b"").await?;
        debug!(namespace = %self.namespace, "Namespace directory finalized");
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        if let Some(mut file) = self.writer.lock().await.take() {
            file.flush().await?;
        }
        Ok(())
    }
}
