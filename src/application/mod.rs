//! Application services layer.

pub mod backfill;
pub mod cleanup;
pub mod error;
pub mod inventory;
pub mod regenerate;
pub mod repos;
pub mod sync;
pub mod variants;
