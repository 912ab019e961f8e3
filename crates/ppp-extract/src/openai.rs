//! OpenAI-compatible chat completions client with JSON-schema response format.

use std::sync::Arc;

use async_trait::async_trait;
use ppp_http::HttpFetcher;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{CompletionError, CompletionErrorKind, CompletionRequest, StructuredCompletion};

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

const SYSTEM_PROMPT: &str = "You extract structured facts about people from web content. \
Reply with a single JSON object that matches the provided schema. Use null or empty lists for anything the content does not support.";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        }
    }
}

pub struct OpenAiCompletionClient {
    http: Arc<HttpFetcher>,
    config: LlmConfig,
}

impl OpenAiCompletionClient {
    pub fn new(http: Arc<HttpFetcher>, config: LlmConfig) -> Self {
        Self { http, config }
    }
}

pub fn build_chat_request(model: &str, temperature: f32, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "temperature": temperature,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": request.instruction },
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": request.schema_name,
                "schema": request.schema,
                "strict": false,
            }
        }
    })
}

/// Pull the JSON document out of the first choice of a chat completion.
pub fn parse_chat_response(body: &Value) -> Result<Value, CompletionError> {
    let message = body["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| CompletionError::new(CompletionErrorKind::Schema, "no choices in response"))?;

    if let Some(refusal) = message["refusal"].as_str().filter(|r| !r.is_empty()) {
        return Err(CompletionError::new(
            CompletionErrorKind::Schema,
            format!("model refused: {refusal}"),
        ));
    }

    let content = message["content"]
        .as_str()
        .ok_or_else(|| CompletionError::new(CompletionErrorKind::Schema, "message has no content"))?;
    serde_json::from_str(strip_code_fence(content)).map_err(|e| {
        CompletionError::new(
            CompletionErrorKind::Schema,
            format!("content is not valid JSON: {e}"),
        )
    })
}

/// Some compatible servers wrap JSON in a markdown fence even in JSON mode.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl StructuredCompletion for OpenAiCompletionClient {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Value, CompletionError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = build_chat_request(&self.config.model, self.config.temperature, request);
        info!(model = %self.config.model, schema = request.schema_name, "calling completion API");

        let resp = self
            .http
            .post_json(request.run_id, &url, Some(&self.config.api_key), &body)
            .await
            .map_err(|err| CompletionError::from_fetch(&err))?;

        let text = resp.text();
        debug!(response = ppp_http::truncate_utf8(&text, 2000), "completion response");
        let data: Value = serde_json::from_str(&text).map_err(|e| {
            CompletionError::new(CompletionErrorKind::Schema, format!("response is not JSON: {e}"))
        })?;
        parse_chat_response(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::routing::post;
    use axum::{Json, Router};
    use ppp_http::{BackoffPolicy, HttpClientConfig};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    use crate::schema::{person_profile_schema, PERSON_PROFILE_SCHEMA_NAME};

    fn request() -> CompletionRequest {
        CompletionRequest {
            run_id: Uuid::new_v4(),
            instruction: "extract Ada".to_string(),
            schema_name: PERSON_PROFILE_SCHEMA_NAME,
            schema: person_profile_schema(),
        }
    }

    fn chat_body(content: &str) -> Value {
        json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
    }

    #[test]
    fn request_carries_schema_and_instruction() {
        let body = build_chat_request("gpt-test", 0.0, &request());
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][1]["content"], "extract Ada");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "person_profile");
        assert!(body["response_format"]["json_schema"]["schema"]["properties"]["full_name"].is_object());
    }

    #[test]
    fn first_choice_content_is_parsed_as_json() {
        let value = parse_chat_response(&chat_body(r#"{"full_name":"Ada"}"#)).expect("parse");
        assert_eq!(value["full_name"], "Ada");

        let fenced = parse_chat_response(&chat_body("```json\n{\"full_name\":\"Ada\"}\n```"))
            .expect("fenced");
        assert_eq!(fenced["full_name"], "Ada");
    }

    #[test]
    fn malformed_responses_are_schema_errors() {
        for body in [
            json!({ "choices": [] }),
            chat_body("Ada was a mathematician."),
            json!({ "choices": [ { "message": { "content": null, "refusal": "cannot help" } } ] }),
        ] {
            let err = parse_chat_response(&body).unwrap_err();
            assert_eq!(err.kind, CompletionErrorKind::Schema, "{body}");
        }
    }

    #[tokio::test]
    async fn client_round_trips_against_compatible_server() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let name = body["response_format"]["json_schema"]["name"].clone();
                Json(json!({
                    "choices": [ { "message": { "content": format!("{{\"full_name\":\"Ada\",\"key_topics\":[{name}]}}") } } ]
                }))
            }),
        );
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });

        let http = Arc::new(
            HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(5),
                backoff: BackoffPolicy::none(),
                ..Default::default()
            })
            .expect("client"),
        );
        let mut config = LlmConfig::new("sk-test");
        config.base_url = format!("http://{addr}/v1");

        let value = OpenAiCompletionClient::new(http, config)
            .complete(&request())
            .await
            .expect("completion");

        assert_eq!(value["full_name"], "Ada");
        assert_eq!(value["key_topics"][0], "person_profile");
    }

    #[tokio::test]
    async fn auth_failures_are_classified() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "invalid api key") }),
        );
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });

        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("client"));
        let mut config = LlmConfig::new("sk-bad");
        config.base_url = format!("http://{addr}/v1");

        let err = OpenAiCompletionClient::new(http, config)
            .complete(&request())
            .await
            .unwrap_err();
        assert_eq!(err.kind, CompletionErrorKind::Auth);
        assert_eq!(err.status, Some(401));
    }
}
