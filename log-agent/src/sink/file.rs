use super::dsn::Precision;
use super::point::{encode_batch, Point};
use super::PointSink;
use crate::error::SinkError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Appends line protocol to a local file instead of a store.
///
/// Each batch is written with a single `write_all` on an append-mode handle, so
/// concurrent sink workers never interleave within a batch.
#[derive(Debug, Clone)]
pub struct LineProtocolFile {
    path: PathBuf,
    precision: Precision,
}

impl LineProtocolFile {
    pub fn new(path: PathBuf, precision: Precision) -> Self {
        Self { path, precision }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PointSink for LineProtocolFile {
    async fn ping(&self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_points(&self, points: &[Point]) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = encode_batch(points, self.precision);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;

        debug!(
            points = points.len(),
            output = %self.path.display(),
            "appended batch to local sink"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
