//! Backfill of missing derived variants onto media rows.
//!
//! The tick body lives here as a plain async function over injected
//! collaborators; the timer that drives it is owned by the caller. One tick
//! selects a bounded batch, processes items sequentially, and persists every
//! change in a single batch at the end.

use std::sync::Arc;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    application::{
        error::AppError,
        repos::{DerivedUpdate, MediaRepo},
        variants::{VariantGenerator, base_name_for},
    },
    domain::media::MediaItem,
    infra::storage::MediaStorage,
};

/// Collaborators shared by the backfill worker and the regeneration command.
#[derive(Clone)]
pub struct PipelineContext {
    pub repo: Arc<dyn MediaRepo>,
    pub storage: MediaStorage,
    pub generator: VariantGenerator,
}

/// What happened to a single item within a tick.
#[derive(Debug)]
pub enum ItemOutcome {
    Processed(DerivedUpdate),
    /// The original URL did not resolve to a readable file. The item stays
    /// incomplete and will match the selection predicate again next tick.
    MissingSource,
    Failed(String),
}

/// Tally of one backfill tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub selected: usize,
    pub processed: usize,
    pub missing_source: usize,
    pub failed: usize,
}

/// Select up to `batch_size` incomplete items and produce their variants.
///
/// Item-level failures are logged and skipped; only selection or persistence
/// failures propagate. Cancellation is honoured between items; accumulated
/// updates are still persisted so completed work is not thrown away.
pub async fn run_backfill_tick(
    ctx: &PipelineContext,
    batch_size: u32,
    token: &CancellationToken,
) -> Result<TickReport, AppError> {
    let items = ctx.repo.select_backfill(batch_size).await?;
    let mut report = TickReport {
        selected: items.len(),
        ..TickReport::default()
    };

    if items.is_empty() {
        return Ok(report);
    }

    let mut updates = Vec::with_capacity(items.len());
    for item in items {
        if token.is_cancelled() {
            break;
        }
        match process_item(ctx, &item, false).await {
            ItemOutcome::Processed(update) => {
                updates.push(update);
                report.processed += 1;
            }
            ItemOutcome::MissingSource => report.missing_source += 1,
            ItemOutcome::Failed(_) => report.failed += 1,
        }
    }

    if !updates.is_empty() {
        ctx.repo.apply_derived_updates(&updates).await?;
    }

    counter!("vignette_backfill_processed_total").increment(report.processed as u64);
    counter!("vignette_backfill_failed_total").increment(report.failed as u64);
    counter!("vignette_backfill_missing_source_total").increment(report.missing_source as u64);

    info!(
        target: "vignette::backfill",
        selected = report.selected,
        processed = report.processed,
        missing = report.missing_source,
        failed = report.failed,
        "backfill tick complete"
    );

    Ok(report)
}

/// Produce variants for one item and assemble its row update.
///
/// With `force`, dimensions and file size overwrite whatever the row holds;
/// without it they are only filled in where the row has none.
pub async fn process_item(ctx: &PipelineContext, item: &MediaItem, force: bool) -> ItemOutcome {
    let source = match ctx.storage.resolve_url(&item.original_url) {
        Ok(path) => path,
        Err(err) => {
            warn!(
                target: "vignette::backfill",
                id = item.id,
                url = %item.original_url,
                error = %err,
                "original URL does not map to storage; skipping"
            );
            return ItemOutcome::MissingSource;
        }
    };

    match tokio::fs::try_exists(&source).await {
        Ok(true) => {}
        _ => {
            warn!(
                target: "vignette::backfill",
                id = item.id,
                path = %source.display(),
                "source file missing; skipping"
            );
            return ItemOutcome::MissingSource;
        }
    }

    let generator = ctx.generator.clone();
    let base_name = base_name_for(&item.original_url, item.id);
    let original_url = item.original_url.clone();
    let generated = tokio::task::spawn_blocking(move || {
        generator.process(&source, &base_name, &original_url)
    })
    .await;

    let processed = match generated {
        Ok(Ok(processed)) => processed,
        Ok(Err(err)) => {
            error!(
                target: "vignette::backfill",
                id = item.id,
                error = %err,
                "variant generation failed"
            );
            return ItemOutcome::Failed(err.to_string());
        }
        Err(join_err) => {
            error!(
                target: "vignette::backfill",
                id = item.id,
                error = %join_err,
                "variant generation task aborted"
            );
            return ItemOutcome::Failed(join_err.to_string());
        }
    };

    let width = i32::try_from(processed.width).ok();
    let height = i32::try_from(processed.height).ok();
    let file_size = i64::try_from(processed.file_size).ok();

    ItemOutcome::Processed(DerivedUpdate {
        id: item.id,
        thumbnail_url: processed.thumbnail_url,
        thumbnail_webp_url: processed.thumbnail_webp_url,
        large_url: processed.large_url,
        large_webp_url: processed.large_webp_url,
        width: width.filter(|_| force || item.width.is_none()),
        height: height.filter(|_| force || item.height.is_none()),
        file_size: file_size.filter(|_| force || item.file_size.is_none()),
    })
}
