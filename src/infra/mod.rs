//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
