//! HTTP client for the authority protocol.
//!
//! Speaks JSON against the sync server:
//! - `POST /sync/{household}/pull`
//! - `POST /sync/{household}/submit`
//! - `GET  /health`
//!
//! Requests carry the API key as a bearer token; the server maps it to the
//! caller's household and refuses anything outside it.

use reqwest::StatusCode;

use crate::journal::MutationRecord;
use crate::sync::{Authority, PullRequest, PullResponse, SubmitResponse, SyncError};

/// Authority client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    server_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpAuthority {
    /// Creates a client for the given server and API key.
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, household_id: &str, action: &str) -> String {
        format!(
            "{}/sync/{}/{}",
            self.server_url.trim_end_matches('/'),
            household_id,
            action
        )
    }

    async fn post<B, R>(&self, url: &str, household_id: &str, body: &B) -> Result<R, SyncError>
    where
        B: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| SyncError::Protocol(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SyncError::Unauthorized(household_id.to_string()))
            }
            status if status.is_server_error() => {
                Err(SyncError::AuthorityUnavailable(status.to_string()))
            }
            status => Err(SyncError::Protocol(format!(
                "unexpected status {} from {}",
                status, url
            ))),
        }
    }
}

impl Authority for HttpAuthority {
    async fn pull(
        &self,
        household_id: &str,
        checkpoint: Option<u64>,
    ) -> Result<PullResponse, SyncError> {
        let url = self.endpoint(household_id, "pull");
        self.post(&url, household_id, &PullRequest { checkpoint })
            .await
    }

    async fn submit(&self, record: &MutationRecord) -> Result<SubmitResponse, SyncError> {
        let url = self.endpoint(&record.household_id, "submit");
        self.post(&url, &record.household_id, record).await
    }
}

/// Checks whether a sync server is reachable.
///
/// Used before auto-sync to fail fast when offline.
pub async fn check_server(server_url: &str) -> bool {
    let url = format!("{}/health", server_url.trim_end_matches('/'));
    match reqwest::get(&url).await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}
