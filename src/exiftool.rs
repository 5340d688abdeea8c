//! High-level client: typed exiftool operations over a worker pool.

use crate::batch::{Pool, PoolConfig, PoolStats, SubmitOptions, ToolProtocol, VersionTask};
use crate::error::Result;
use crate::exif::{
    ExtractBinaryTask, Metadata, ReadOptions, ReadTask, RewriteAllTagsTask, WriteSummary,
    WriteTask,
};
use crate::tz::TzConfig;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument;

/// An exiftool client. Clones share one worker pool.
#[derive(Debug, Clone)]
pub struct ExifTool {
    pool: Pool,
    tz: Arc<watch::Sender<TzConfig>>,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new(ToolProtocol::default(), PoolConfig::default(), TzConfig::default())
    }
}

impl ExifTool {
    /// Must be called from within a Tokio runtime.
    pub fn new(protocol: ToolProtocol, pool: PoolConfig, tz: TzConfig) -> Self {
        Self {
            pool: Pool::new(protocol, pool),
            tz: Arc::new(watch::Sender::new(tz)),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Read all tags, with timezone inference applied.
    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Metadata> {
        self.read_with(path, ReadOptions::default()).await
    }

    #[instrument(level = "debug", skip(self, options), fields(path = %path.as_ref().display()))]
    pub async fn read_with(&self, path: impl AsRef<Path>, options: ReadOptions) -> Result<Metadata> {
        let task = ReadTask::new(path, options, self.tz_config());
        self.pool.submit(task).await
    }

    /// Write tags in place (no `_original` backup). An empty value deletes the tag.
    #[instrument(level = "debug", skip(self, tags), fields(path = %path.as_ref().display(), tags = tags.len()))]
    pub async fn write(&self, path: impl AsRef<Path>, tags: &[(String, String)]) -> Result<WriteSummary> {
        let task = WriteTask::new(path, tags, true)?;
        self.pool.submit(task).await
    }

    /// Save a binary tag such as `ThumbnailImage` to `dest`.
    pub async fn extract_binary(
        &self,
        path: impl AsRef<Path>,
        tag: &str,
        dest: impl AsRef<Path>,
    ) -> Result<()> {
        let task = ExtractBinaryTask::new(path, tag, dest)?;
        self.pool.submit(task).await
    }

    /// Write a copy of `path` to `dest` with all metadata rebuilt.
    pub async fn rewrite_all_tags(
        &self,
        path: impl AsRef<Path>,
        dest: impl AsRef<Path>,
    ) -> Result<WriteSummary> {
        self.pool.submit(RewriteAllTagsTask::new(path, dest)).await
    }

    pub async fn version(&self) -> Result<String> {
        self.pool
            .submit_with(VersionTask::default(), SubmitOptions::default())
            .await
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        self.pool.stats().await
    }

    /// End every worker. Later calls fail with `PoolEnded`.
    pub async fn end(&self) {
        self.pool.end().await
    }

    pub fn tz_config(&self) -> TzConfig {
        *self.tz.borrow()
    }

    /// Applies to reads submitted after this call.
    pub fn set_tz_config(&self, config: TzConfig) {
        self.tz.send_replace(config);
    }

    pub fn subscribe_tz_config(&self) -> watch::Receiver<TzConfig> {
        self.tz.subscribe()
    }
}
