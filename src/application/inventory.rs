//! Variant-completeness reporting for `list-media`.

use crate::{
    application::repos::{MediaRepo, RepoError},
    domain::media::VariantStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRow {
    pub id: i64,
    pub title: String,
    pub status: VariantStatus,
}

/// Completeness status per image item, lowest id first. By default only
/// incomplete items are returned; `include_complete` shows everything.
pub async fn media_inventory(
    repo: &dyn MediaRepo,
    include_complete: bool,
) -> Result<Vec<InventoryRow>, RepoError> {
    let items = repo.list_images().await?;
    Ok(items
        .into_iter()
        .filter_map(|item| {
            let status = item.variant_status();
            if !include_complete && status == VariantStatus::Complete {
                return None;
            }
            Some(InventoryRow {
                id: item.id,
                title: item.title,
                status,
            })
        })
        .collect())
}
