//! Temporary-storage sync dispatch.
//!
//! A coarse "something is pending" signal: when either temporary directory
//! holds files, ask the external automation job to move them to permanent
//! storage. No per-file tracking: redundant dispatches are accepted and
//! deduplicated by the remote job, not here.

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info};

use crate::{
    application::error::AppError,
    infra::{dispatch::DispatchError, storage::MediaStorage},
};

#[async_trait]
pub trait SyncDispatcher: Send + Sync {
    /// Ask the automation API to run one sync job.
    async fn request_sync(&self) -> Result<(), DispatchError>;
}

/// One dispatcher tick: look for pending files, dispatch if any exist.
///
/// Errors propagate to the loop, which switches to its retry cadence.
pub async fn run_sync_tick(
    storage: &MediaStorage,
    dispatcher: &dyn SyncDispatcher,
) -> Result<(), AppError> {
    let pending = storage.list_derived().await?;
    if pending.is_empty() {
        debug!(target: "vignette::sync", "no pending derived files");
        return Ok(());
    }

    info!(
        target: "vignette::sync",
        pending = pending.len(),
        "requesting sync of temporary storage"
    );

    match dispatcher.request_sync().await {
        Ok(()) => {
            counter!("vignette_sync_dispatch_total").increment(1);
            Ok(())
        }
        Err(err) => {
            counter!("vignette_sync_dispatch_failed_total").increment(1);
            Err(err.into())
        }
    }
}
