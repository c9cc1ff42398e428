use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{DerivedUpdate, MediaRepo, RegenerationScope, RepoError},
    domain::media::{MediaItem, MediaKind},
};

use super::{PostgresRepositories, map_sqlx_error};

const MEDIA_COLUMNS: &str = "id, title, media_kind, original_url, \
     thumbnail_url, thumbnail_webp_url, large_url, large_webp_url, \
     width, height, file_size, is_approved, is_featured, is_active, \
     created_at, updated_at";

/// SQL form of [`MediaItem::needs_backfill`]. Empty strings and NULLs both
/// count as unpopulated.
const BACKFILL_PREDICATE: &str = "media_kind = 'image' AND is_active \
     AND (COALESCE(thumbnail_webp_url, '') = '' OR COALESCE(large_webp_url, '') = '')";

#[derive(sqlx::FromRow)]
struct MediaRow {
    id: i64,
    title: String,
    media_kind: String,
    original_url: String,
    thumbnail_url: Option<String>,
    thumbnail_webp_url: Option<String>,
    large_url: Option<String>,
    large_webp_url: Option<String>,
    width: Option<i32>,
    height: Option<i32>,
    file_size: Option<i64>,
    is_approved: bool,
    is_featured: bool,
    is_active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<MediaRow> for MediaItem {
    type Error = RepoError;

    fn try_from(row: MediaRow) -> Result<Self, Self::Error> {
        let media_kind = MediaKind::from_str(&row.media_kind)
            .map_err(|err| RepoError::integrity(err.to_string()))?;
        Ok(Self {
            id: row.id,
            title: row.title,
            media_kind,
            original_url: row.original_url,
            thumbnail_url: row.thumbnail_url,
            thumbnail_webp_url: row.thumbnail_webp_url,
            large_url: row.large_url,
            large_webp_url: row.large_webp_url,
            width: row.width,
            height: row.height,
            file_size: row.file_size,
            is_approved: row.is_approved,
            is_featured: row.is_featured,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect_items(rows: Vec<MediaRow>) -> Result<Vec<MediaItem>, RepoError> {
    rows.into_iter().map(MediaItem::try_from).collect()
}

#[async_trait]
impl MediaRepo for PostgresRepositories {
    async fn select_backfill(&self, limit: u32) -> Result<Vec<MediaItem>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {MEDIA_COLUMNS} FROM media_items WHERE {BACKFILL_PREDICATE} ORDER BY id LIMIT "
        ));
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<MediaRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        collect_items(rows)
    }

    async fn select_regeneration(
        &self,
        scope: RegenerationScope,
    ) -> Result<Vec<MediaItem>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {MEDIA_COLUMNS} FROM media_items WHERE media_kind = 'image' AND is_active "
        ));

        if !scope.force {
            qb.push(" AND (COALESCE(thumbnail_webp_url, '') = '' OR COALESCE(large_webp_url, '') = '') ");
        }

        if let Some(id) = scope.id {
            qb.push(" AND id = ");
            qb.push_bind(id);
        }

        qb.push(" ORDER BY id");

        let rows = qb
            .build_query_as::<MediaRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        collect_items(rows)
    }

    async fn list_images(&self) -> Result<Vec<MediaItem>, RepoError> {
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_items WHERE media_kind = 'image' ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        collect_items(rows)
    }

    async fn list_active(&self) -> Result<Vec<MediaItem>, RepoError> {
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media_items WHERE is_active ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        collect_items(rows)
    }

    async fn apply_derived_updates(&self, updates: &[DerivedUpdate]) -> Result<(), RepoError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        for update in updates {
            let mut qb = QueryBuilder::<Postgres>::new("UPDATE media_items SET thumbnail_url = ");
            qb.push_bind(update.thumbnail_url.as_str());
            qb.push(", thumbnail_webp_url = ");
            qb.push_bind(update.thumbnail_webp_url.as_str());
            qb.push(", large_url = ");
            qb.push_bind(update.large_url.as_str());
            qb.push(", large_webp_url = ");
            qb.push_bind(update.large_webp_url.as_str());

            if let Some(width) = update.width {
                qb.push(", width = ");
                qb.push_bind(width);
            }
            if let Some(height) = update.height {
                qb.push(", height = ");
                qb.push_bind(height);
            }
            if let Some(file_size) = update.file_size {
                qb.push(", file_size = ");
                qb.push_bind(file_size);
            }

            qb.push(", updated_at = now() WHERE id = ");
            qb.push_bind(update.id);

            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}
