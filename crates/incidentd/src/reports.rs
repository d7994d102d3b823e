//! Report artifacts: one pretty-printed JSON file per run at `<dir>/<id>.json`.
//!
//! Writes are staged to a uniquely named temp file and renamed into place, so
//! a report on disk is always complete.

use incident_shared::{IncidentError, IncidentReport, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

/// A written but not yet visible report
#[derive(Debug)]
pub struct StagedReport {
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl StagedReport {
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic location of a run's report
    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Serialize `report` next to its final path.
    pub async fn stage(&self, report: &IncidentReport) -> Result<StagedReport> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let final_path = self.path_for(report.id);
        // unique per attempt so concurrent completers never share a temp file
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", report.id, Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&temp_path, json).await?;

        debug!("Staged report {}", temp_path.display());
        Ok(StagedReport {
            temp_path,
            final_path,
        })
    }

    /// Make a staged report visible at its final path.
    pub async fn commit(&self, staged: StagedReport) -> Result<PathBuf> {
        let renamed = tokio::fs::rename(&staged.temp_path, &staged.final_path).await;
        if let Err(e) = renamed {
            self.discard(staged).await;
            return Err(e.into());
        }
        Ok(staged.final_path)
    }

    /// Drop a staged report that lost the completion race.
    pub async fn discard(&self, staged: StagedReport) {
        if let Err(e) = tokio::fs::remove_file(&staged.temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove {}: {}", staged.temp_path.display(), e);
            }
        }
    }

    /// Report bytes; `NotFound` when the file is gone, whatever the run row says.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(IncidentError::not_found("Report file"))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load(&self, path: &Path) -> Result<IncidentReport> {
        let bytes = self.read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Delete a report; an already missing file is fine. Returns whether a file was removed.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
