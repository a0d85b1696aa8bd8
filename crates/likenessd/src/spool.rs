//! Spool directory ingestion.
//!
//! The upload pipeline drops one `*.json` batch per media item into the
//! spool directory. Each batch is ingested through the engine and then
//! moved to `done/`, or to `failed/` when it cannot be parsed. A batch cut
//! short by cancellation is rewritten in place with only the detections
//! that were not ingested, so the next sweep picks up where this one
//! stopped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use likeness_core::{Detection, GalleryError, MediaRef};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::engine::{EngineHandle, IngestResult};

const DONE_DIR: &str = "done";
const FAILED_DIR: &str = "failed";

/// One media item's worth of detector output.
#[derive(Debug, Serialize, Deserialize)]
pub struct SpoolBatch {
    pub media: MediaRef,
    pub detections: Vec<Detection>,
}

/// Counts from one sweep of the spool directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Batches fully ingested and moved to `done/`.
    pub batches: usize,
    pub faces_assigned: usize,
    pub faces_rejected: usize,
    /// Detections written back to the spool after cancellation.
    pub faces_requeued: usize,
    pub unreadable: usize,
}

pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ingest every pending batch, oldest name first.
    pub async fn drain(&self, engine: &EngineHandle, cancel: &CancellationToken) -> Result<DrainReport> {
        tokio::fs::create_dir_all(self.dir.join(DONE_DIR)).await?;
        tokio::fs::create_dir_all(self.dir.join(FAILED_DIR)).await?;

        let mut report = DrainReport::default();
        for path in self.pending().await? {
            if cancel.is_cancelled() {
                break;
            }

            let batch = match read_batch(&path).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable spool batch");
                    self.move_to(&path, FAILED_DIR).await?;
                    report.unreadable += 1;
                    continue;
                }
            };

            let media = batch.media.clone();
            let detections = batch.detections.clone();
            let results = engine
                .ingest(batch.media, batch.detections, cancel.child_token())
                .await?;
            self.settle(&path, media, detections, &results, &mut report).await?;
        }
        Ok(report)
    }

    /// Record one batch's results and move or rewrite its file.
    async fn settle(
        &self,
        path: &Path,
        media: MediaRef,
        detections: Vec<Detection>,
        results: &IngestResult,
        report: &mut DrainReport,
    ) -> Result<()> {
        let mut remaining = Vec::new();
        let mut assigned = 0;
        for (detection, result) in detections.into_iter().zip(results) {
            match result {
                Ok(_) => assigned += 1,
                Err(GalleryError::Cancelled) => remaining.push(detection),
                Err(_) => report.faces_rejected += 1,
            }
        }
        report.faces_assigned += assigned;

        if remaining.is_empty() {
            tracing::info!(media = %media, faces = results.len(), assigned, "spool batch ingested");
            report.batches += 1;
            return self.move_to(path, DONE_DIR).await;
        }

        tracing::info!(
            media = %media,
            assigned,
            remaining = remaining.len(),
            "spool batch interrupted, requeued"
        );
        report.faces_requeued += remaining.len();
        let batch = SpoolBatch {
            media,
            detections: remaining,
        };
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&batch)?).await?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("requeueing {}", path.display()))
    }

    async fn pending(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading spool {}", self.dir.display()))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn move_to(&self, path: &Path, sub: &str) -> Result<()> {
        let Some(name) = path.file_name() else {
            return Ok(());
        };
        tokio::fs::rename(path, self.dir.join(sub).join(name))
            .await
            .with_context(|| format!("moving {} to {sub}/", path.display()))
    }
}

async fn read_batch(path: &Path) -> Result<SpoolBatch> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
