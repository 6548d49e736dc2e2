//! Replay provider for recorded MJPEG byte files

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tracing::info;

use super::stream::ByteStreamProvider;
use crate::provider::Provider;
use crate::types::Frame;
use crate::{RelayError, Result};

/// Replay provider that reads concatenated JPEG images from disk
///
/// The file is read as fast as the pipeline consumes it; the delivery queue
/// applies the playback cadence.
pub struct ReplayProvider {
    inner: ByteStreamProvider<File>,
    path: PathBuf,
}

impl ReplayProvider {
    /// Open a recorded stream
    pub async fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| RelayError::file_error(path.clone(), e))?;

        let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        info!("Opened replay file: {} ({} bytes)", path.display(), size);

        let label = path.display().to_string();
        let inner = ByteStreamProvider::with_chunk_size(file, label, chunk_size);
        Ok(Self { inner, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl Provider for ReplayProvider {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.next_frame().await
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.path.display())
    }
}
