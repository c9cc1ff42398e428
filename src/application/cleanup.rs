//! Reconciliation of derived-file storage against the database.
//!
//! Orphan detection is a pure set difference: files present in the two
//! temporary directories minus files referenced by any active item's URL
//! fields. Referenced-but-missing files are deliberately not flagged; the
//! walk only ever goes disk → database.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::{
    application::{error::AppError, repos::MediaRepo},
    infra::storage::{MediaStorage, StorageError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct OrphanReport {
    pub orphans: Vec<OrphanFile>,
}

impl OrphanReport {
    pub fn total_bytes(&self) -> u64 {
        self.orphans.iter().map(|file| file.size_bytes).sum()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeletionReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Compute the orphaned-file set without touching anything.
pub async fn find_orphans(
    repo: &dyn MediaRepo,
    storage: &MediaStorage,
) -> Result<OrphanReport, AppError> {
    let mut referenced: HashSet<PathBuf> = HashSet::new();
    for item in repo.list_active().await? {
        for url in item.referenced_urls() {
            match storage.resolve_url(url) {
                Ok(path) => {
                    referenced.insert(path);
                }
                Err(err) => {
                    // A URL that does not map into storage cannot protect a
                    // file, but it is worth a note in the logs.
                    debug!(
                        target: "vignette::cleanup",
                        id = item.id,
                        url,
                        error = %err,
                        "referenced URL does not resolve"
                    );
                }
            }
        }
    }

    let mut orphans = Vec::new();
    for path in storage.list_derived().await? {
        if referenced.contains(&path) {
            continue;
        }
        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.len())
            .map_err(StorageError::from)?;
        orphans.push(OrphanFile { path, size_bytes });
    }
    orphans.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(OrphanReport { orphans })
}

/// Delete the given orphans, counting per-file success and failure.
pub async fn delete_orphans(storage: &MediaStorage, orphans: &[OrphanFile]) -> DeletionReport {
    let mut report = DeletionReport::default();
    for orphan in orphans {
        match storage.delete(&orphan.path).await {
            Ok(()) => report.deleted += 1,
            Err(err) => {
                warn!(
                    target: "vignette::cleanup",
                    path = %orphan.path.display(),
                    error = %err,
                    "failed to delete orphaned file"
                );
                report.failed += 1;
            }
        }
    }
    report
}
