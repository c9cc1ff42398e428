//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::media::MediaItem;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("integrity error: {message}")]
    Integrity { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

/// Which rows a regeneration run should touch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegenerationScope {
    /// Include items whose variant set is already complete.
    pub force: bool,
    /// Restrict to a single item. A nonexistent id yields an empty set,
    /// which is success ("no items need it"), not an error.
    pub id: Option<i64>,
}

/// Derived fields written back onto one media row.
///
/// The four URLs are always written; dimensions and size are written only
/// when `Some`; the caller decides whether existing values may be
/// overwritten (`--force`) or only filled in when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedUpdate {
    pub id: i64,
    pub thumbnail_url: String,
    pub thumbnail_webp_url: String,
    pub large_url: String,
    pub large_webp_url: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub file_size: Option<i64>,
}

#[async_trait]
pub trait MediaRepo: Send + Sync {
    /// Active image items missing a WebP thumbnail or WebP large variant,
    /// lowest id first, at most `limit` rows.
    async fn select_backfill(&self, limit: u32) -> Result<Vec<MediaItem>, RepoError>;

    /// Image items matching a regeneration scope, lowest id first.
    async fn select_regeneration(
        &self,
        scope: RegenerationScope,
    ) -> Result<Vec<MediaItem>, RepoError>;

    /// Every image item, lowest id first, for the completeness report.
    async fn list_images(&self) -> Result<Vec<MediaItem>, RepoError>;

    /// Every active item of any kind, for cleanup reference resolution.
    async fn list_active(&self) -> Result<Vec<MediaItem>, RepoError>;

    /// Persist a batch of derived-field updates in one transaction,
    /// bumping `updated_at` on every touched row.
    async fn apply_derived_updates(&self, updates: &[DerivedUpdate]) -> Result<(), RepoError>;
}
