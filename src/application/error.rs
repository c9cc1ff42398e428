use thiserror::Error;

use crate::{
    application::{repos::RepoError, variants::VariantError},
    infra::{dispatch::DispatchError, error::InfraError, storage::StorageError},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Variant(#[from] VariantError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("{0}")]
    CommandFailed(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// A command completed but some of its items failed; exits non-zero.
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
