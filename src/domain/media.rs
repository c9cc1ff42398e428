//! Media item records and variant-completeness invariants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// The kind of asset a media row describes. Only images participate in the
/// thumbnail pipeline; videos and gifs are carried for the wider library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Gif,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Gif => "gif",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown media kind `{0}`")]
pub struct ParseMediaKindError(String);

impl FromStr for MediaKind {
    type Err = ParseMediaKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "gif" => Ok(Self::Gif),
            other => Err(ParseMediaKindError(other.to_string())),
        }
    }
}

/// One uploaded asset as persisted in `media_items`.
///
/// The four derived URL columns stay `NULL` until the backfill worker (or an
/// operator regeneration) has produced the corresponding files.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: i64,
    pub title: String,
    pub media_kind: MediaKind,
    pub original_url: String,
    pub thumbnail_url: Option<String>,
    pub thumbnail_webp_url: Option<String>,
    pub large_url: Option<String>,
    pub large_webp_url: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub file_size: Option<i64>,
    pub is_approved: bool,
    pub is_featured: bool,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Completeness of the derived-variant set, judged purely on which of the
/// four URL columns are populated. Empty strings count as unpopulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantStatus {
    /// All four derived URLs present.
    Complete,
    /// At least one JPEG variant present, no WebP variant.
    JpegOnly,
    /// Some WebP present but the set is incomplete.
    PartialWebp,
    /// No derived URL populated at all.
    Missing,
}

impl VariantStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Complete => "Complete",
            Self::JpegOnly => "JPEG-only",
            Self::PartialWebp => "Partial-WebP",
            Self::Missing => "Missing",
        }
    }
}

impl fmt::Display for VariantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn populated(url: &Option<String>) -> bool {
    url.as_deref().is_some_and(|value| !value.is_empty())
}

impl MediaItem {
    /// An item is complete iff all four derived URLs are non-empty.
    pub fn is_complete(&self) -> bool {
        self.variant_status() == VariantStatus::Complete
    }

    /// Selection predicate shared by the backfill worker and the default
    /// `regenerate-thumbnails` run: active image missing either WebP variant.
    pub fn needs_backfill(&self) -> bool {
        self.media_kind == MediaKind::Image
            && self.is_active
            && (!populated(&self.thumbnail_webp_url) || !populated(&self.large_webp_url))
    }

    pub fn variant_status(&self) -> VariantStatus {
        let jpeg = [&self.thumbnail_url, &self.large_url];
        let webp = [&self.thumbnail_webp_url, &self.large_webp_url];

        let jpeg_count = jpeg.iter().filter(|url| populated(url)).count();
        let webp_count = webp.iter().filter(|url| populated(url)).count();

        match (jpeg_count, webp_count) {
            (2, 2) => VariantStatus::Complete,
            (0, 0) => VariantStatus::Missing,
            (_, 0) => VariantStatus::JpegOnly,
            _ => VariantStatus::PartialWebp,
        }
    }

    /// All populated URL fields of this item, original included. Used by the
    /// cleanup reconciliation to build the referenced-file set.
    pub fn referenced_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(Some(self.original_url.as_str()))
            .chain([
                self.thumbnail_url.as_deref(),
                self.thumbnail_webp_url.as_deref(),
                self.large_url.as_deref(),
                self.large_webp_url.as_deref(),
            ])
            .flatten()
            .filter(|url| !url.is_empty())
    }
}

/// Transient result of one image-processing pass. Owned by the caller that
/// requested processing and copied field-by-field onto a [`MediaItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub original_url: String,
    pub thumbnail_url: String,
    pub thumbnail_webp_url: String,
    /// Aliases `original_url` when the source already fits the large box.
    pub large_url: String,
    pub large_webp_url: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn item() -> MediaItem {
        MediaItem {
            id: 1,
            title: "Keep of the Iron Host".to_string(),
            media_kind: MediaKind::Image,
            original_url: "/uploads/media/originals/keep.png".to_string(),
            thumbnail_url: None,
            thumbnail_webp_url: None,
            large_url: None,
            large_webp_url: None,
            width: None,
            height: None,
            file_size: None,
            is_approved: true,
            is_featured: false,
            is_active: true,
            created_at: datetime!(2026-01-05 12:00 UTC),
            updated_at: datetime!(2026-01-05 12:00 UTC),
        }
    }

    #[test]
    fn fresh_item_is_missing_and_needs_backfill() {
        let item = item();
        assert_eq!(item.variant_status(), VariantStatus::Missing);
        assert!(item.needs_backfill());
    }

    #[test]
    fn all_four_urls_mean_complete() {
        let mut item = item();
        item.thumbnail_url = Some("/images/screenshots/thumbnails/keep_thumb.jpg".to_string());
        item.thumbnail_webp_url = Some("/images/screenshots/thumbnails/keep_thumb.webp".to_string());
        item.large_url = Some("/images/screenshots/large/keep_large.jpg".to_string());
        item.large_webp_url = Some("/images/screenshots/large/keep_large.webp".to_string());
        assert_eq!(item.variant_status(), VariantStatus::Complete);
        assert!(!item.needs_backfill());
    }

    #[test]
    fn jpeg_variants_without_webp_classify_as_jpeg_only() {
        let mut item = item();
        item.thumbnail_url = Some("/images/screenshots/thumbnails/keep_thumb.jpg".to_string());
        item.large_url = Some("/images/screenshots/large/keep_large.jpg".to_string());
        assert_eq!(item.variant_status(), VariantStatus::JpegOnly);
        assert!(item.needs_backfill());
    }

    #[test]
    fn incomplete_webp_set_classifies_as_partial() {
        let mut item = item();
        item.thumbnail_url = Some("/images/screenshots/thumbnails/keep_thumb.jpg".to_string());
        item.thumbnail_webp_url = Some("/images/screenshots/thumbnails/keep_thumb.webp".to_string());
        assert_eq!(item.variant_status(), VariantStatus::PartialWebp);
        assert!(item.needs_backfill());
    }

    #[test]
    fn empty_strings_count_as_unpopulated() {
        let mut item = item();
        item.thumbnail_url = Some(String::new());
        item.thumbnail_webp_url = Some(String::new());
        assert_eq!(item.variant_status(), VariantStatus::Missing);
    }

    #[test]
    fn inactive_and_non_image_items_never_match_the_predicate() {
        let mut inactive = item();
        inactive.is_active = false;
        assert!(!inactive.needs_backfill());

        let mut video = item();
        video.media_kind = MediaKind::Video;
        assert!(!video.needs_backfill());
    }

    #[test]
    fn referenced_urls_skip_unpopulated_fields() {
        let mut item = item();
        item.thumbnail_url = Some("/images/screenshots/thumbnails/keep_thumb.jpg".to_string());
        item.large_url = Some(String::new());
        let urls: Vec<&str> = item.referenced_urls().collect();
        assert_eq!(
            urls,
            vec![
                "/uploads/media/originals/keep.png",
                "/images/screenshots/thumbnails/keep_thumb.jpg",
            ]
        );
    }
}
