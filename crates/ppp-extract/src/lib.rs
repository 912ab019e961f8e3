//! Profile extraction: one raw source in, one candidate [`PersonProfile`] out.
//!
//! The language model is reached through [`StructuredCompletion`], a function
//! from (instruction, schema) to a JSON value. [`ProfileExtractor`] builds the
//! instruction, validates the reply leniently and stamps provenance.

pub mod openai;
pub mod schema;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ppp_adapters::RawSource;
use ppp_core::{PersonProfile, ValidationError};
use ppp_http::FetchError;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub use openai::{LlmConfig, OpenAiCompletionClient};
pub use schema::{person_profile_schema, PERSON_PROFILE_SCHEMA_NAME};

pub const CRATE_NAME: &str = "ppp-extract";

pub const DEFAULT_MAX_CONTENT_CHARS: usize = 6000;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub run_id: Uuid,
    pub instruction: String,
    pub schema_name: &'static str,
    pub schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionErrorKind {
    Auth,
    /// 402, or a 429 that reports exhausted quota.
    Quota,
    RateLimit,
    Timeout,
    Network,
    Server,
    /// Reply did not contain a JSON document of the requested shape.
    Schema,
    Unknown,
}

impl fmt::Display for CompletionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Auth => "authentication",
            Self::Quota => "quota",
            Self::RateLimit => "rate limit",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Server => "server",
            Self::Schema => "schema",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => CompletionErrorKind::Auth,
            402 => CompletionErrorKind::Quota,
            429 if body.contains("insufficient_quota") => CompletionErrorKind::Quota,
            429 => CompletionErrorKind::RateLimit,
            408 => CompletionErrorKind::Timeout,
            500..=599 => CompletionErrorKind::Server,
            _ => CompletionErrorKind::Unknown,
        };
        Self {
            kind,
            status: Some(status),
            message: body.to_string(),
        }
    }

    pub fn from_fetch(err: &FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, body, .. } => Self::from_status(*status, body),
            FetchError::Request(inner) if err.is_timeout() => {
                Self::new(CompletionErrorKind::Timeout, inner.to_string())
            }
            FetchError::Request(inner) => Self::new(CompletionErrorKind::Network, inner.to_string()),
            other => Self::new(CompletionErrorKind::Unknown, other.to_string()),
        }
    }

    /// Retrying with the same credentials will not help.
    pub fn is_configuration(&self) -> bool {
        matches!(self.kind, CompletionErrorKind::Auth | CompletionErrorKind::Quota)
    }
}

#[async_trait]
pub trait StructuredCompletion: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Value, CompletionError>;
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extracting profile for `{query}`: {source}")]
    Completion {
        query: String,
        #[source]
        source: CompletionError,
    },
    #[error("extracting profile for `{query}`: {source}")]
    Validation {
        query: String,
        #[source]
        source: ValidationError,
    },
}

impl ExtractionError {
    pub fn query(&self) -> &str {
        match self {
            Self::Completion { query, .. } | Self::Validation { query, .. } => query,
        }
    }

    pub fn kind(&self) -> CompletionErrorKind {
        match self {
            Self::Completion { source, .. } => source.kind,
            Self::Validation { .. } => CompletionErrorKind::Schema,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Completion { source, .. } if source.is_configuration())
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub max_content_chars: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

pub fn build_instruction(query: &str, content: &str, max_chars: usize) -> String {
    let content = truncate_chars(content, max_chars);
    format!(
        "The content below was collected while researching {query}. Extract detailed information about this person.\n\
         Record work experience, education, achievements and interesting facts when the content mentions them; leave anything it does not mention empty.\n\
         \n\
         Content:\n\
         {content}\n\
         \n\
         Look for:\n\
         1. Basic information (name, current role, location)\n\
         2. Professional background\n\
         3. Educational history\n\
         4. Skills and expertise\n\
         5. Publications or other content they produced\n\
         6. Speaking engagements\n\
         7. Achievements\n\
         8. Interesting facts\n\
         9. Key topics they focus on\n\
         10. Professional network (collaborations, organizations)\n\
         \n\
         File dated happenings under key_events, recent_events (last six months) or upcoming_events, with dates as YYYY-MM-DD.\n\
         Be conservative: only include information that is clearly stated or strongly implied by the content. Do not guess."
    )
}

pub struct ProfileExtractor {
    client: Arc<dyn StructuredCompletion>,
    config: ExtractorConfig,
}

impl ProfileExtractor {
    pub fn new(client: Arc<dyn StructuredCompletion>, config: ExtractorConfig) -> Self {
        Self { client, config }
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// Extract one candidate profile from `source`.
    ///
    /// `data_sources` on the result is always `source.urls`; whatever the
    /// model put there is discarded.
    pub async fn extract_profile(
        &self,
        run_id: Uuid,
        source: &RawSource,
        query: &str,
    ) -> Result<PersonProfile, ExtractionError> {
        let request = CompletionRequest {
            run_id,
            instruction: build_instruction(query, &source.content, self.config.max_content_chars),
            schema_name: PERSON_PROFILE_SCHEMA_NAME,
            schema: person_profile_schema(),
        };

        let value = self
            .client
            .complete(&request)
            .await
            .map_err(|source| ExtractionError::Completion {
                query: query.to_string(),
                source,
            })?;

        let mut profile =
            PersonProfile::from_json_value(value).map_err(|source| ExtractionError::Validation {
                query: query.to_string(),
                source,
            })?;
        profile.data_sources = source.urls.clone();
        debug!(
            provider = self.client.provider_name(),
            urls = source.urls.len(),
            "extracted candidate profile"
        );
        Ok(profile)
    }
}
