//! Profile pipeline: gather raw sources, extract candidates concurrently,
//! merge them and finalize the result.

pub mod merge;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ppp_adapters::{
    GatherContext, GatherError, ManualSourceGatherer, PageScraper, RawSource, SearchConfig,
    SourceGatherer, TavilySearcher, TAVILY_DEFAULT_BASE_URL,
};
use ppp_core::{PersonProfile, EVENT_DATE_FORMAT};
use ppp_extract::openai::{DEFAULT_MODEL, OPENAI_DEFAULT_BASE_URL};
use ppp_extract::{
    CompletionErrorKind, ExtractionError, ExtractorConfig, LlmConfig, OpenAiCompletionClient,
    ProfileExtractor, DEFAULT_MAX_CONTENT_CHARS,
};
use ppp_http::{FetchError, HttpClientConfig, HttpFetcher, TokenBucketConfig, BROWSER_USER_AGENT};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use merge::{merge_profiles, strategy_for, MergeStrategy, FIELD_STRATEGIES};

pub const CRATE_NAME: &str = "ppp-pipeline";
pub const DEFAULT_USER_AGENT: &str = "ppp-bot/0.1";

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub tavily_api_key: Option<String>,
    pub tavily_base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub max_content_chars: usize,
    pub search_max_results: u32,
    pub llm_requests_per_minute: Option<u32>,
    pub manual_sources: Vec<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: OPENAI_DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            tavily_api_key: None,
            tavily_base_url: TAVILY_DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
            extract_timeout_secs: 60,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            search_max_results: 5,
            llm_requests_per_minute: None,
            manual_sources: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            openai_api_key: text("OPENAI_API_KEY"),
            openai_base_url: text("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            model: text("PPP_MODEL").unwrap_or(defaults.model),
            tavily_api_key: text("TAVILY_API_KEY"),
            tavily_base_url: text("TAVILY_BASE_URL").unwrap_or(defaults.tavily_base_url),
            user_agent: text("PPP_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: number(text("PPP_HTTP_TIMEOUT_SECS"))
                .unwrap_or(defaults.http_timeout_secs),
            extract_timeout_secs: number(text("PPP_EXTRACT_TIMEOUT_SECS"))
                .unwrap_or(defaults.extract_timeout_secs),
            max_content_chars: number(text("PPP_MAX_CONTENT_CHARS"))
                .unwrap_or(defaults.max_content_chars),
            search_max_results: number(text("PPP_SEARCH_MAX_RESULTS"))
                .unwrap_or(defaults.search_max_results),
            llm_requests_per_minute: number(text("PPP_LLM_REQUESTS_PER_MINUTE")),
            manual_sources: defaults.manual_sources,
        }
    }
}

fn number<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPolicy {
    #[default]
    SkipFailed,
    AbortOnFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Network,
    NoResults,
}

impl ErrorCategory {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Configuration => {
                "The search or language-model service rejected the request. Check OPENAI_API_KEY and TAVILY_API_KEY in your environment or .env file."
            }
            Self::Network => {
                "Could not reach the search or language-model service. Check your connection and try again."
            }
            Self::NoResults => {
                "No usable public information was found. Try a full name with a company, or a profile URL."
            }
        }
    }

    fn dominant(failures: &[SourceFailure]) -> Self {
        let has = |category| failures.iter().any(|f| f.category == category);
        if has(Self::Configuration) {
            Self::Configuration
        } else if has(Self::Network) {
            Self::Network
        } else {
            Self::NoResults
        }
    }
}

fn fetch_category(err: &FetchError) -> ErrorCategory {
    match err {
        FetchError::Request(inner) if inner.status().is_none() => ErrorCategory::Network,
        _ => match err.status() {
            Some(401 | 403) => ErrorCategory::Configuration,
            Some(status) if status == 429 || status >= 500 => ErrorCategory::Network,
            _ => ErrorCategory::NoResults,
        },
    }
}

fn gather_category(err: &GatherError) -> ErrorCategory {
    err.fetch_error()
        .map(fetch_category)
        .unwrap_or(ErrorCategory::NoResults)
}

fn extraction_category(err: &ExtractionError) -> ErrorCategory {
    if err.is_configuration() {
        return ErrorCategory::Configuration;
    }
    match err.kind() {
        CompletionErrorKind::Timeout
        | CompletionErrorKind::Network
        | CompletionErrorKind::Server
        | CompletionErrorKind::RateLimit => ErrorCategory::Network,
        _ => ErrorCategory::NoResults,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Gather,
    Extract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub stage: FailureStage,
    /// Gatherer id, or the first URL of the failed source.
    pub source: String,
    pub category: ErrorCategory,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub sources_gathered: usize,
    pub profiles_extracted: usize,
    pub failures: Vec<SourceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileRun {
    pub run_id: Uuid,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub profile: PersonProfile,
    pub report: RunReport,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("missing configuration: {0} is not set")]
    MissingConfig(&'static str),
    #[error("building http client: {0:#}")]
    HttpClient(anyhow::Error),
    #[error("no sources found for `{query}`")]
    NoSources {
        query: String,
        failures: Vec<SourceFailure>,
    },
    #[error("no profile could be extracted for `{query}`")]
    NoProfiles {
        query: String,
        failures: Vec<SourceFailure>,
    },
    #[error("run for `{query}` aborted at {}: {}", .failure.source, .failure.message)]
    Aborted { query: String, failure: SourceFailure },
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EmptyQuery => ErrorCategory::NoResults,
            Self::MissingConfig(_) | Self::HttpClient(_) => ErrorCategory::Configuration,
            Self::NoSources { failures, .. } | Self::NoProfiles { failures, .. } => {
                ErrorCategory::dominant(failures)
            }
            Self::Aborted { failure, .. } => failure.category,
        }
    }

    /// Message safe to show an end user; carries no upstream detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyQuery => {
                "Enter a name, a profile URL or a short description of the person.".to_string()
            }
            Self::MissingConfig(key) => format!(
                "{key} is not set. Add it to your environment or .env file and try again."
            ),
            other => other.category().user_message().to_string(),
        }
    }
}

// ------------------------------------------------------------
// Finalize hooks
// ------------------------------------------------------------

pub trait ProfileHook: Send + Sync {
    fn apply(&self, profile: PersonProfile) -> PersonProfile;
}

#[derive(Default)]
pub struct SortEventsHook;

impl ProfileHook for SortEventsHook {
    fn apply(&self, mut profile: PersonProfile) -> PersonProfile {
        profile.sort_events();
        profile
    }
}

#[derive(Default)]
pub struct LastUpdatedHook {
    fixed: Option<NaiveDate>,
}

impl LastUpdatedHook {
    pub fn on(date: NaiveDate) -> Self {
        Self { fixed: Some(date) }
    }
}

impl ProfileHook for LastUpdatedHook {
    fn apply(&self, mut profile: PersonProfile) -> PersonProfile {
        let date = self.fixed.unwrap_or_else(|| Utc::now().date_naive());
        profile.last_updated = Some(date.format(EVENT_DATE_FORMAT).to_string());
        profile
    }
}

pub fn default_hooks() -> Vec<Box<dyn ProfileHook>> {
    vec![
        Box::<SortEventsHook>::default(),
        Box::<LastUpdatedHook>::default(),
    ]
}

// ------------------------------------------------------------
// Pipeline
// ------------------------------------------------------------

#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn profile(&self, query: &str) -> Result<ProfileRun, PipelineError>;
}

pub struct ProfilePipeline {
    gatherers: Vec<Arc<dyn SourceGatherer>>,
    extractor: Arc<ProfileExtractor>,
    extract_timeout: Duration,
    policy: ExtractionPolicy,
    hooks: Vec<Box<dyn ProfileHook>>,
}

impl ProfilePipeline {
    pub fn new(gatherers: Vec<Arc<dyn SourceGatherer>>, extractor: ProfileExtractor) -> Self {
        Self {
            gatherers,
            extractor: Arc::new(extractor),
            extract_timeout: Duration::from_secs(60),
            policy: ExtractionPolicy::default(),
            hooks: default_hooks(),
        }
    }

    pub fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    pub fn with_hooks(mut self, hooks: Vec<Box<dyn ProfileHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let openai_api_key = config
            .openai_api_key
            .clone()
            .ok_or(PipelineError::MissingConfig("OPENAI_API_KEY"))?;
        let tavily_api_key = config
            .tavily_api_key
            .clone()
            .ok_or(PipelineError::MissingConfig("TAVILY_API_KEY"))?;

        let scrape_http = HttpFetcher::new(HttpClientConfig {
            timeout: SCRAPE_TIMEOUT,
            user_agent: Some(BROWSER_USER_AGENT.to_string()),
            ..Default::default()
        })
        .map_err(PipelineError::HttpClient)?;
        let api_timeout = Duration::from_secs(config.http_timeout_secs);
        let search_http = HttpFetcher::new(HttpClientConfig {
            timeout: api_timeout,
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })
        .map_err(PipelineError::HttpClient)?;
        let llm_http = HttpFetcher::new(HttpClientConfig {
            timeout: api_timeout,
            user_agent: Some(config.user_agent.clone()),
            token_bucket: config.llm_requests_per_minute.map(TokenBucketConfig::per_minute),
            ..Default::default()
        })
        .map_err(PipelineError::HttpClient)?;

        let search_config = SearchConfig {
            base_url: config.tavily_base_url.clone(),
            max_results: config.search_max_results,
            ..SearchConfig::new(tavily_api_key)
        };
        let llm_config = LlmConfig {
            base_url: config.openai_base_url.clone(),
            model: config.model.clone(),
            ..LlmConfig::new(openai_api_key)
        };

        let mut gatherers: Vec<Arc<dyn SourceGatherer>> = vec![
            Arc::new(PageScraper::new(Arc::new(scrape_http))),
            Arc::new(TavilySearcher::new(Arc::new(search_http), search_config)),
        ];
        if !config.manual_sources.is_empty() {
            gatherers.push(Arc::new(ManualSourceGatherer::new(
                config.manual_sources.clone(),
            )));
        }
        let extractor = ProfileExtractor::new(
            Arc::new(OpenAiCompletionClient::new(Arc::new(llm_http), llm_config)),
            ExtractorConfig {
                max_content_chars: config.max_content_chars,
            },
        );

        Ok(Self::new(gatherers, extractor)
            .with_extract_timeout(Duration::from_secs(config.extract_timeout_secs)))
    }

    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_config(&PipelineConfig::from_env())
    }

    pub async fn run(&self, query: &str) -> Result<ProfileRun, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        let run_id = Uuid::new_v4();
        let span = info_span!("profile_run", %run_id, query);
        self.run_inner(run_id, query).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, query: &str) -> Result<ProfileRun, PipelineError> {
        let started_at = Utc::now();
        let mut report = RunReport::default();

        let sources = self.gather(run_id, query, &mut report).await;
        report.sources_gathered = sources.len();
        if sources.is_empty() {
            return Err(PipelineError::NoSources {
                query: query.to_string(),
                failures: report.failures,
            });
        }

        let candidates = self.extract_all(run_id, query, sources, &mut report).await?;
        report.profiles_extracted = candidates.len();
        if candidates.is_empty() {
            return Err(PipelineError::NoProfiles {
                query: query.to_string(),
                failures: report.failures,
            });
        }

        let merged = merge_profiles(&candidates);
        if !merged.has_content() {
            warn!(candidates = candidates.len(), "extracted profiles carry no facts");
            return Err(PipelineError::NoProfiles {
                query: query.to_string(),
                failures: report.failures,
            });
        }
        let profile = self.hooks.iter().fold(merged, |profile, hook| hook.apply(profile));
        info!(
            sources = report.sources_gathered,
            extracted = report.profiles_extracted,
            failures = report.failures.len(),
            "profile run finished"
        );

        Ok(ProfileRun {
            run_id,
            query: query.to_string(),
            started_at,
            finished_at: Utc::now(),
            profile,
            report,
        })
    }

    async fn gather(&self, run_id: Uuid, query: &str, report: &mut RunReport) -> Vec<RawSource> {
        let ctx = GatherContext { run_id };
        let mut sources = Vec::new();
        for gatherer in self.gatherers.iter().filter(|g| g.applies_to(query)) {
            match gatherer.gather(&ctx, query).await {
                Ok(found) => sources.extend(found.into_iter().filter(|s| !s.is_blank())),
                Err(err) => {
                    warn!(gatherer = gatherer.gatherer_id(), error = %err, "gather failed");
                    report.failures.push(SourceFailure {
                        stage: FailureStage::Gather,
                        source: gatherer.gatherer_id().to_string(),
                        category: gather_category(&err),
                        message: err.to_string(),
                    });
                }
            }
        }
        sources
    }

    /// Extract every source concurrently; candidates come back in source
    /// order regardless of completion order.
    async fn extract_all(
        &self,
        run_id: Uuid,
        query: &str,
        sources: Vec<RawSource>,
        report: &mut RunReport,
    ) -> Result<Vec<PersonProfile>, PipelineError> {
        let limit = self.extract_timeout;
        let mut slots: Vec<Option<PersonProfile>> = vec![None; sources.len()];
        let mut labels = Vec::with_capacity(sources.len());
        let mut tasks = JoinSet::new();

        for (index, source) in sources.into_iter().enumerate() {
            labels.push(
                source
                    .urls
                    .first()
                    .cloned()
                    .unwrap_or_else(|| format!("source #{index}")),
            );
            let extractor = Arc::clone(&self.extractor);
            let query = query.to_string();
            tasks.spawn(
                async move {
                    let outcome = tokio::time::timeout(
                        limit,
                        extractor.extract_profile(run_id, &source, &query),
                    )
                    .await;
                    (index, outcome)
                }
                .in_current_span(),
            );
        }

        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, failure) = match joined {
                Ok((index, Ok(Ok(profile)))) => {
                    slots[index] = Some(profile);
                    continue;
                }
                Ok((index, Ok(Err(err)))) => (
                    index,
                    SourceFailure {
                        stage: FailureStage::Extract,
                        source: labels[index].clone(),
                        category: extraction_category(&err),
                        message: err.to_string(),
                    },
                ),
                Ok((index, Err(_elapsed))) => (
                    index,
                    SourceFailure {
                        stage: FailureStage::Extract,
                        source: labels[index].clone(),
                        category: ErrorCategory::Network,
                        message: format!("extraction timed out after {limit:?}"),
                    },
                ),
                Err(join_err) => (
                    usize::MAX,
                    SourceFailure {
                        stage: FailureStage::Extract,
                        source: "extraction task".to_string(),
                        category: ErrorCategory::NoResults,
                        message: join_err.to_string(),
                    },
                ),
            };
            warn!(source = %failure.source, error = %failure.message, "extraction failed");
            if self.policy == ExtractionPolicy::AbortOnFirst {
                return Err(PipelineError::Aborted {
                    query: query.to_string(),
                    failure,
                });
            }
            failed.push((index, failure));
        }

        failed.sort_by_key(|(index, _)| *index);
        report.failures.extend(failed.into_iter().map(|(_, failure)| failure));
        Ok(slots.into_iter().flatten().collect())
    }
}

#[async_trait]
impl ProfileService for ProfilePipeline {
    async fn profile(&self, query: &str) -> Result<ProfileRun, PipelineError> {
        self.run(query).await
    }
}
