//! On-demand variant regeneration for the operator CLI.

use tracing::info;

use crate::{
    application::{
        backfill::{ItemOutcome, PipelineContext, process_item},
        error::AppError,
        repos::RegenerationScope,
    },
    domain::media::MediaItem,
};

/// Per-item result line for the printed tally.
#[derive(Debug)]
pub struct ItemResult {
    pub id: i64,
    pub title: String,
    pub outcome: Outcome,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Regenerated,
    MissingSource,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct RegenerationReport {
    pub items: Vec<ItemResult>,
}

impl RegenerationReport {
    pub fn selected(&self) -> usize {
        self.items.len()
    }

    pub fn processed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Regenerated))
    }

    pub fn missing(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::MissingSource))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Failed(_)))
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.items
            .iter()
            .filter(|item| predicate(&item.outcome))
            .count()
    }
}

/// Process every item in scope, persisting each success as it happens.
///
/// Unlike the worker tick there is no end-of-run batch: updates already
/// written stay committed even if a later item blows up, which is exactly
/// the documented CLI failure policy.
pub async fn run_regeneration(
    ctx: &PipelineContext,
    scope: RegenerationScope,
) -> Result<RegenerationReport, AppError> {
    let items = ctx.repo.select_regeneration(scope).await?;
    info!(
        target: "vignette::regenerate",
        selected = items.len(),
        force = scope.force,
        "starting regeneration"
    );

    let mut report = RegenerationReport::default();
    for item in items {
        let outcome = regenerate_one(ctx, &item, scope.force).await?;
        report.items.push(ItemResult {
            id: item.id,
            title: item.title.clone(),
            outcome,
        });
    }

    Ok(report)
}

async fn regenerate_one(
    ctx: &PipelineContext,
    item: &MediaItem,
    force: bool,
) -> Result<Outcome, AppError> {
    match process_item(ctx, item, force).await {
        ItemOutcome::Processed(update) => {
            ctx.repo
                .apply_derived_updates(std::slice::from_ref(&update))
                .await?;
            Ok(Outcome::Regenerated)
        }
        ItemOutcome::MissingSource => Ok(Outcome::MissingSource),
        ItemOutcome::Failed(reason) => Ok(Outcome::Failed(reason)),
    }
}
