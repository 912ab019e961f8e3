//! Axum + Askama web UI and JSON API for the profiler.

use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ppp_core::{Event, EventCategory, PersonProfile};
use ppp_http::Url;
use ppp_pipeline::{ErrorCategory, PipelineError, ProfilePipeline, ProfileService, RunReport};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "ppp-web";
pub const DEFAULT_WEB_PORT: u16 = 8000;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn ProfileService>,
}

impl AppState {
    pub fn new(service: Arc<dyn ProfileService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProfileParams {
    #[serde(default)]
    q: String,
}

// ------------------------------------------------------------
// View model
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fact {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub heading: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryGroup {
    pub title: String,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListGroup {
    pub title: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub label: String,
    pub url: String,
    /// Only http(s) URLs become anchors; anything else renders as text.
    pub clickable: bool,
}

impl Link {
    fn new(label: impl Into<String>, url: &str) -> Self {
        let clickable = Url::parse(url.trim())
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        Self {
            label: label.into(),
            url: url.to_string(),
            clickable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRow {
    pub date: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub title: String,
    pub events: Vec<EventRow>,
}

/// Display-ready profile: plain strings, empty sections dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileView {
    pub name: String,
    pub headline: String,
    pub facts: Vec<Fact>,
    pub entries: Vec<EntryGroup>,
    pub lists: Vec<ListGroup>,
    pub links: Vec<Link>,
    pub timelines: Vec<Timeline>,
    pub sources: Vec<String>,
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

fn join_present(parts: &[&str], sep: &str) -> String {
    parts
        .iter()
        .copied()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

fn with_suffix(head: String, suffix: &str) -> String {
    match (head.is_empty(), suffix.is_empty()) {
        (_, true) => head,
        (true, false) => suffix.to_string(),
        (false, false) => format!("{head} ({suffix})"),
    }
}

fn event_row(event: &Event) -> EventRow {
    let title = match text(&event.title) {
        "" => "Untitled".to_string(),
        title => title.to_string(),
    };
    EventRow {
        date: match text(&event.date) {
            "" => "undated".to_string(),
            date => date.to_string(),
        },
        title,
        description: text(&event.description).to_string(),
    }
}

fn timeline_title(category: EventCategory) -> &'static str {
    match category {
        EventCategory::Key => "Key events",
        EventCategory::Recent => "Recent events",
        EventCategory::Upcoming => "Upcoming events",
    }
}

impl ProfileView {
    /// `query` names the page when the profile has no name.
    pub fn from_profile(profile: &PersonProfile, query: &str) -> Self {
        let name = match text(&profile.full_name) {
            "" => query.trim().to_string(),
            name => name.to_string(),
        };

        let facts = [
            ("Current role", text(&profile.current_role)),
            ("Company", text(&profile.company)),
            ("Location", text(&profile.location)),
            ("Last known activity", text(&profile.last_known_activity_date)),
            ("Profile updated", text(&profile.last_updated)),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(label, value)| Fact {
            label: label.to_string(),
            value: value.to_string(),
        })
        .collect();

        let work = profile
            .work_experience
            .iter()
            .map(|w| Entry {
                heading: with_suffix(
                    join_present(&[text(&w.title), text(&w.company)], " at "),
                    text(&w.duration),
                ),
                detail: text(&w.description).to_string(),
            })
            .collect();
        let education = profile
            .education
            .iter()
            .map(|e| Entry {
                heading: with_suffix(
                    join_present(&[text(&e.degree), text(&e.institution)], ", "),
                    text(&e.year),
                ),
                detail: String::new(),
            })
            .collect();
        let publications = profile
            .publications
            .iter()
            .map(|p| Entry {
                heading: with_suffix(text(&p.title).to_string(), text(&p.year)),
                detail: text(&p.description).to_string(),
            })
            .collect();
        let entries = [
            ("Work experience", work),
            ("Education", education),
            ("Publications", publications),
        ]
        .into_iter()
        .map(|(title, entries): (&str, Vec<Entry>)| EntryGroup {
            title: title.to_string(),
            entries: entries.into_iter().filter(|e| !e.heading.is_empty()).collect(),
        })
        .filter(|g| !g.entries.is_empty())
        .collect();

        let lists = [
            ("Skills", &profile.skills),
            ("Key topics", &profile.key_topics),
            ("Interests", &profile.interests),
            ("Achievements", &profile.achievements),
            ("Certifications", &profile.certifications),
            ("Languages", &profile.languages),
            ("Interesting facts", &profile.interesting_facts),
            ("Collaborations", &profile.collaborations),
            ("Organizations", &profile.organizations),
        ]
        .into_iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(title, items)| ListGroup {
            title: title.to_string(),
            items: items.clone(),
        })
        .collect();

        let links = profile
            .social_profiles
            .iter()
            .map(|(platform, url)| Link::new(platform.as_str(), url))
            .chain(profile.websites.iter().map(|url| Link::new("Website", url)))
            .collect();

        let mut timelines = vec![Timeline {
            title: "Speaking engagements".to_string(),
            events: profile.speaking_engagements.iter().map(event_row).collect(),
        }];
        timelines.extend(EventCategory::ALL.into_iter().map(|category| Timeline {
            title: timeline_title(category).to_string(),
            events: profile.events(category).iter().map(event_row).collect(),
        }));
        timelines.retain(|t| !t.events.is_empty());

        Self {
            name,
            headline: text(&profile.professional_headline).to_string(),
            facts,
            entries,
            lists,
            links,
            timelines,
            sources: profile.data_sources.clone(),
        }
    }
}

pub fn report_line(report: &RunReport) -> String {
    format!(
        "{} sources gathered, {} profiles extracted, {} skipped",
        report.sources_gathered,
        report.profiles_extracted,
        report.failures.len()
    )
}

// ------------------------------------------------------------
// Templates and handlers
// ------------------------------------------------------------

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    query: String,
    error: String,
}

#[derive(Template)]
#[template(path = "profile.html")]
struct ProfileTemplate {
    query: String,
    view: ProfileView,
    report_line: String,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
    category: ErrorCategory,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/profile", get(profile_page_handler))
        .route("/api/profile", get(profile_api_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub fn port_from_env() -> u16 {
    std::env::var("PPP_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_WEB_PORT)
}

pub async fn serve(service: Arc<dyn ProfileService>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "web UI listening");
    axum::serve(listener, app(AppState::new(service))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let pipeline = ProfilePipeline::from_env()?;
    serve(Arc::new(pipeline), port_from_env()).await
}

async fn index_handler() -> Response {
    render_html(IndexTemplate {
        query: String::new(),
        error: String::new(),
    })
}

async fn run_query(state: &AppState, query: &str) -> Result<ppp_pipeline::ProfileRun, PipelineError> {
    if query.trim().is_empty() {
        return Err(PipelineError::EmptyQuery);
    }
    state.service.profile(query).await.inspect_err(|err| {
        warn!(error = %err, "profile request failed");
    })
}

async fn profile_page_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProfileParams>,
) -> Response {
    match run_query(&state, &params.q).await {
        Ok(run) => render_html(ProfileTemplate {
            view: ProfileView::from_profile(&run.profile, &run.query),
            report_line: report_line(&run.report),
            query: run.query,
        }),
        Err(err) => {
            let mut resp = render_html(IndexTemplate {
                query: params.q,
                error: err.user_message(),
            });
            *resp.status_mut() = status_for(&err);
            resp
        }
    }
}

async fn profile_api_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProfileParams>,
) -> Response {
    match run_query(&state, &params.q).await {
        Ok(run) => Json(run).into_response(),
        Err(err) => (
            status_for(&err),
            Json(ApiError {
                error: err.user_message(),
                category: err.category(),
            }),
        )
            .into_response(),
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

fn status_for(err: &PipelineError) -> StatusCode {
    if matches!(err, PipelineError::EmptyQuery) {
        return StatusCode::BAD_REQUEST;
    }
    match err.category() {
        ErrorCategory::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCategory::Network => StatusCode::BAD_GATEWAY,
        ErrorCategory::NoResults => StatusCode::NOT_FOUND,
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %err, "template render failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html("Server error".to_string()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::header;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use ppp_core::{Education, WorkExperience};
    use ppp_pipeline::{FailureStage, ProfileRun, SourceFailure};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct StubService;

    fn run_for(query: &str, profile: PersonProfile) -> ProfileRun {
        ProfileRun {
            run_id: Uuid::new_v4(),
            query: query.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            profile,
            report: RunReport {
                sources_gathered: 2,
                profiles_extracted: 2,
                failures: Vec::new(),
            },
        }
    }

    fn ada() -> PersonProfile {
        PersonProfile {
            full_name: Some("Ada Lovelace".into()),
            current_role: Some("Analyst".into()),
            company: Some("Analytical Engine Project".into()),
            skills: vec!["mathematics".into(), "poetical science".into()],
            social_profiles: BTreeMap::from([(
                "twitter".to_string(),
                "https://twitter.com/ada".to_string(),
            )]),
            recent_events: vec![Event {
                title: Some("Published Note G".into()),
                date: Some("1843-09-01".into()),
                ..Default::default()
            }],
            data_sources: vec!["https://en.wikipedia.org/wiki/Ada_Lovelace".into()],
            ..Default::default()
        }
    }

    #[async_trait]
    impl ProfileService for StubService {
        async fn profile(&self, query: &str) -> Result<ProfileRun, PipelineError> {
            match query {
                "Ada Lovelace" => Ok(run_for(query, ada())),
                "offline" => Err(PipelineError::NoProfiles {
                    query: query.to_string(),
                    failures: vec![SourceFailure {
                        stage: FailureStage::Extract,
                        source: "wiki.org".into(),
                        category: ErrorCategory::Network,
                        message: "connection refused by 10.0.0.7".into(),
                    }],
                }),
                "Mallory" => Ok(run_for(
                    query,
                    PersonProfile {
                        full_name: Some("Mallory".into()),
                        social_profiles: BTreeMap::from([(
                            "twitter".to_string(),
                            "javascript:alert(document.cookie)".to_string(),
                        )]),
                        websites: vec!["https://mallory.example".into(), "mallory.example".into()],
                        ..Default::default()
                    },
                )),
                q if q.starts_with('<') => Ok(run_for(
                    q,
                    PersonProfile {
                        full_name: Some(q.to_string()),
                        ..Default::default()
                    },
                )),
                _ => Err(PipelineError::NoSources {
                    query: query.to_string(),
                    failures: Vec::new(),
                }),
            }
        }
    }

    fn test_app() -> Router {
        app(AppState::new(Arc::new(StubService)))
    }

    async fn get(uri: &str) -> (StatusCode, String, String) {
        let resp = test_app()
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap(), content_type)
    }

    #[tokio::test]
    async fn handler_smoke_get_index() {
        let (status, text, _) = get("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("Personal Prospect Profiler"));
        assert!(text.contains("name=\"q\""));
    }

    #[tokio::test]
    async fn handler_smoke_healthz() {
        let (status, text, _) = get("/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn profile_page_renders_sections() {
        let (status, text, _) = get("/profile?q=Ada%20Lovelace").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("<h1>Ada Lovelace</h1>"));
        assert!(text.contains("Analytical Engine Project"));
        assert!(text.contains("poetical science"));
        assert!(text.contains("Published Note G"));
        assert!(text.contains("https://twitter.com/ada"));
        assert!(text.contains("2 sources gathered"));
    }

    #[tokio::test]
    async fn profile_page_escapes_model_output() {
        let (status, text, _) = get("/profile?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!text.contains("<script>alert(1)</script>"));
        assert!(text.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn profile_page_links_only_web_urls() {
        let (status, text, _) = get("/profile?q=Mallory").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!text.contains("href=\"javascript:"));
        assert!(text.contains("twitter: javascript:alert(document.cookie)</li>"));
        assert!(text.contains(r#"<a href="https:"#));
        assert!(!text.contains(r#"href="mallory.example""#));
    }

    #[test]
    fn links_are_clickable_only_for_http_schemes() {
        assert!(Link::new("Website", "https://ada.example").clickable);
        assert!(Link::new("Website", " http://ada.example/about ").clickable);
        assert!(!Link::new("twitter", "javascript:alert(1)").clickable);
        assert!(!Link::new("twitter", "JavaScript:alert(1)").clickable);
        assert!(!Link::new("Website", "data:text/html,hi").clickable);
        assert!(!Link::new("Website", "ada.example").clickable);
    }

    #[tokio::test]
    async fn profile_page_shows_user_message_on_failure() {
        let (status, text, _) = get("/profile?q=offline").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(text.contains("Check your connection"));
        assert!(!text.contains("10.0.0.7"));

        let (status, _, _) = get("/profile?q=%20%20").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_returns_profile_and_report_json() {
        let (status, text, content_type) = get("/api/profile?q=Ada+Lovelace").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "application/json");
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["profile"]["full_name"], "Ada Lovelace");
        assert_eq!(value["report"]["profiles_extracted"], 2);
        assert_eq!(value["query"], "Ada Lovelace");
    }

    #[tokio::test]
    async fn api_errors_carry_category() {
        let (status, text, _) = get("/api/profile?q=Nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["category"], "no_results");
        assert!(value["error"].as_str().unwrap().contains("No usable public information"));
    }

    #[test]
    fn view_falls_back_to_query_and_drops_empty_sections() {
        let view = ProfileView::from_profile(&PersonProfile::default(), " Jane Doe ");
        assert_eq!(view.name, "Jane Doe");
        assert!(view.facts.is_empty());
        assert!(view.entries.is_empty());
        assert!(view.lists.is_empty());
        assert!(view.timelines.is_empty());
    }

    #[test]
    fn view_formats_entries_and_events() {
        let profile = PersonProfile {
            work_experience: vec![WorkExperience {
                title: Some("Translator".into()),
                company: Some("Taylor's Scientific Memoirs".into()),
                duration: Some("1842-1843".into()),
                description: None,
            }],
            education: vec![Education {
                degree: None,
                institution: Some("Private tutoring".into()),
                year: None,
            }],
            upcoming_events: vec![Event::default()],
            websites: vec!["https://ada.example".into()],
            ..Default::default()
        };

        let view = ProfileView::from_profile(&profile, "Ada");

        assert_eq!(
            view.entries[0].entries[0].heading,
            "Translator at Taylor's Scientific Memoirs (1842-1843)"
        );
        assert_eq!(view.entries[1].entries[0].heading, "Private tutoring");
        assert_eq!(view.timelines.len(), 1);
        assert_eq!(view.timelines[0].title, "Upcoming events");
        assert_eq!(view.timelines[0].events[0].date, "undated");
        assert_eq!(view.timelines[0].events[0].title, "Untitled");
        assert_eq!(
            view.links,
            vec![Link {
                label: "Website".into(),
                url: "https://ada.example".into(),
                clickable: true,
            }]
        );
    }
}
