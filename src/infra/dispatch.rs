//! Outbound client for the repository-automation API.
//!
//! The sync dispatcher asks an external CI workflow to move accumulated
//! derived files from temporary storage into permanently served storage.
//! The request is a coarse signal; idempotency is the remote job's problem.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use url::Url;

use crate::application::sync::SyncDispatcher;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("automation API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("automation API rejected the dispatch with status {status}")]
    Rejected { status: u16 },
    #[error("dispatch timestamp could not be formatted: {0}")]
    Timestamp(#[from] time::error::Format),
}

#[derive(Serialize)]
struct DispatchRequest<'a> {
    event_type: &'a str,
    client_payload: ClientPayload<'a>,
}

#[derive(Serialize)]
struct ClientPayload<'a> {
    timestamp: String,
    source: &'a str,
}

/// Bearer-authenticated client issuing sync-job dispatch requests.
#[derive(Debug, Clone)]
pub struct AutomationClient {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
    event_type: String,
    source: String,
}

impl AutomationClient {
    pub fn new(
        endpoint: Url,
        token: String,
        event_type: String,
        source: String,
    ) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vignette/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token,
            event_type,
            source,
        })
    }
}

#[async_trait]
impl SyncDispatcher for AutomationClient {
    async fn request_sync(&self) -> Result<(), DispatchError> {
        let body = DispatchRequest {
            event_type: &self.event_type,
            client_payload: ClientPayload {
                timestamp: OffsetDateTime::now_utc().format(&Rfc3339)?,
                source: &self.source,
            },
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
