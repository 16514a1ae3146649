//! Document regeneration collaborator.
//!
//! Producing new content for a derived document happens outside this crate.
//! The cascade only asks for regeneration and records which fields triggered
//! it; the collaborator later reports completion through
//! [`ReviewService::complete_derived`](crate::review::ReviewService::complete_derived).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::FieldPath;

#[derive(Debug, Error)]
pub enum RegenError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regeneration rejected ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("No regeneration endpoint configured")]
    Disabled,
}

#[async_trait]
pub trait Regenerator: Send + Sync {
    /// Ask for `derived_id` to be regenerated because `fields` changed.
    /// Returns once the request has been accepted, not when content is ready.
    async fn regenerate(&self, derived_id: Uuid, fields: &[FieldPath]) -> Result<(), RegenError>;
}

/// Body posted to the regeneration endpoint.
#[derive(Debug, Serialize)]
struct RegenerateRequest<'a> {
    derived_document_id: Uuid,
    triggering_fields: &'a [FieldPath],
}

/// Posts regeneration requests to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpRegenerator {
    url: String,
    client: Client,
}

impl HttpRegenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Regenerator for HttpRegenerator {
    async fn regenerate(&self, derived_id: Uuid, fields: &[FieldPath]) -> Result<(), RegenError> {
        let response = self
            .client
            .post(&self.url)
            .json(&RegenerateRequest {
                derived_document_id: derived_id,
                triggering_fields: fields,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RegenError::Rejected { status, body })
        }
    }
}

/// Used when no endpoint is configured: every cascade is flagged for
/// manual attention instead of silently succeeding.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledRegenerator;

#[async_trait]
impl Regenerator for DisabledRegenerator {
    async fn regenerate(&self, _derived_id: Uuid, _fields: &[FieldPath]) -> Result<(), RegenError> {
        Err(RegenError::Disabled)
    }
}
