//! Durable mirrors of the debate transcript.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::SinkError;

/// Destination for transcript blocks. Writes are best-effort from the
/// orchestrator's point of view: failures are logged, never fatal.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn write_block(&self, block: &str) -> Result<(), SinkError>;
}

/// Appends blocks to a Markdown file named after the session start time.
///
/// Each block is followed by a blank line. There is no locking: one debate
/// owns one file.
pub struct MarkdownFileSink {
    path: PathBuf,
}

impl MarkdownFileSink {
    pub fn new(dir: impl AsRef<Path>, started_at: DateTime<Local>) -> Self {
        let file_name = format!("debate_{}.md", started_at.format("%Y%m%d_%H%M%S"));
        Self {
            path: dir.as_ref().join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TranscriptSink for MarkdownFileSink {
    async fn write_block(&self, block: &str) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(block.trim_end().as_bytes()).await?;
        file.write_all(b"\n\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Mirrors blocks into the log.
pub struct TracingSink;

#[async_trait]
impl TranscriptSink for TracingSink {
    async fn write_block(&self, block: &str) -> Result<(), SinkError> {
        info!(target: "agora::transcript", "{}", block.trim_end());
        Ok(())
    }
}
