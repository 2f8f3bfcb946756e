//! JSON Lines transcript file

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use super::{SinkError, SinkHealth, TranscriptEntry, TranscriptSink};

/// Appends one JSON object per line; writes are serialized so lines never interleave
pub struct JsonlFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileSink {
    /// Creates the parent directory if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
        info!(path = %path.display(), "Transcript file sink ready");
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SinkError {
    SinkError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl TranscriptSink for JsonlFileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn append(&self, entry: &TranscriptEntry) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| io_error(&self.path, source))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| io_error(&self.path, source))?;
        file.flush()
            .await
            .map_err(|source| io_error(&self.path, source))?;
        Ok(())
    }

    async fn health(&self) -> SinkHealth {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let error = match fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => None,
            Ok(_) => Some(format!("{} is not a directory", dir.display())),
            Err(e) => Some(e.to_string()),
        };
        SinkHealth {
            backend: self.name(),
            enabled: true,
            reachable: error.is_none(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Language, Message};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_writes_one_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlFileSink::open(dir.path().join("archive").join("chat.jsonl"))
            .await
            .unwrap();

        let user = Message::user("Hello");
        let reply = Message::assistant("Hi there");
        for message in [&user, &reply] {
            let entry =
                TranscriptEntry::from_message("s1", message, Some(Language::English), false);
            sink.append(&entry).await.unwrap();
        }

        let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: TranscriptEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.content, "Hello");
        assert_eq!(first.language_hint, Some(Language::English));
        assert!(!first.rate_limited);
    }

    #[tokio::test]
    async fn test_health_reports_reachable_directory() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlFileSink::open(dir.path().join("chat.jsonl"))
            .await
            .unwrap();
        let health = sink.health().await;
        assert!(health.enabled);
        assert!(health.reachable);
    }
}
