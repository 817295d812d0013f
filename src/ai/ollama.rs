//! Ollama vision client
//!
//! Sends one image plus a prompt to a local Ollama server and returns the
//! text it produces. Timeouts, refused connections and 5xx answers are
//! retried; everything else fails on the first attempt.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use std::path::Path;
use std::time::Duration;

use super::http_client::{classify, model_client, LIST_MODELS_TIMEOUT, PROBE_TIMEOUT};
use super::types::{
    ChatMessage, ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, ModelInfo,
    TagsResponse,
};
use crate::config::{ApiStyle, OllamaConfig};
use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;

/// Anything that can turn an image into text.
#[async_trait]
pub trait DescriptionProvider: Send + Sync {
    /// Describe the image at `image_path`; `None` uses the provider's default prompt.
    async fn describe(&self, image_path: &Path, prompt: Option<&str>) -> Result<String>;

    /// Whether the service answers at all. Never errors.
    async fn probe(&self) -> bool;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

pub struct OllamaClient {
    client: Client,
    endpoint: Url,
    model: String,
    api: ApiStyle,
    stream: bool,
    timeout: Duration,
    retry: RetryPolicy,
    default_prompt: String,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig, default_prompt: &str) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            AppError::Config(format!("Invalid Ollama endpoint {}: {}", config.endpoint, e))
        })?;

        Ok(Self {
            client: model_client()?,
            endpoint,
            model: config.model.clone(),
            api: config.api,
            stream: config.stream,
            timeout: config.timeout(),
            retry: config.retry_policy(),
            default_prompt: default_prompt.to_string(),
        })
    }

    /// Endpoint with its path swapped out, e.g. `/api/tags`
    fn url_for(&self, path: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    fn chat_url(&self) -> Url {
        if self.endpoint.path().trim_end_matches('/') == "/api/generate" {
            self.url_for("/api/chat")
        } else {
            self.endpoint.clone()
        }
    }

    async fn request_once(&self, prompt: &str, image_b64: &str) -> Result<String> {
        match self.api {
            ApiStyle::Generate => {
                let body = GenerateRequest {
                    model: &self.model,
                    prompt,
                    images: vec![image_b64],
                    stream: self.stream,
                };
                let response = self.send(self.endpoint.clone(), &body).await?;
                if self.stream {
                    self.read_stream(response).await
                } else {
                    let text = self.read_body(response).await?;
                    let parsed: GenerateResponse = parse_json(&text)?;
                    non_empty(parsed.response, "response")
                }
            }
            ApiStyle::Chat => {
                let body = ChatRequest {
                    model: &self.model,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: prompt,
                        images: vec![image_b64],
                    }],
                    stream: false,
                };
                let response = self.send(self.chat_url(), &body).await?;
                let text = self.read_body(response).await?;
                let parsed: ChatResponse = parse_json(&text)?;
                non_empty(parsed.message.and_then(|m| m.content), "message.content")
            }
        }
    }

    /// POST and classify the status line
    async fn send<B: serde::Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url.clone())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| classify(e, &format!("POST {}", url)))?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => AppError::ServiceNotFound(url.to_string()),
            s if s.is_server_error() => AppError::Service {
                status: s.as_u16(),
                body,
            },
            s => AppError::InvalidResponse(format!("HTTP {}: {}", s.as_u16(), body)),
        })
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<String> {
        response
            .text()
            .await
            .map_err(|e| classify(e, "reading response body"))
    }

    /// Concatenate `response` fragments from newline-delimited JSON until a
    /// chunk reports `done`. The whole stream shares the request timeout.
    async fn read_stream(&self, response: reqwest::Response) -> Result<String> {
        let collect = async {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut text = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| classify(e, "reading stream"))?;
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if append_chunk(&line, &mut text) {
                        return Ok::<_, AppError>(text);
                    }
                }
            }
            append_chunk(&buffer, &mut text);
            Ok::<_, AppError>(text)
        };

        let text = tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "stream did not finish within {:.1}s",
                    self.timeout.as_secs_f64()
                ))
            })??;

        non_empty(Some(text), "response")
    }
}

#[async_trait]
impl DescriptionProvider for OllamaClient {
    async fn describe(&self, image_path: &Path, prompt: Option<&str>) -> Result<String> {
        let bytes = tokio::fs::read(image_path).await.map_err(|e| AppError::CorruptedImage {
            path: image_path.to_path_buf(),
            reason: format!("could not read file: {}", e),
        })?;
        let encoded = STANDARD.encode(&bytes);
        let prompt = super::prompts::resolve_prompt(prompt, &self.default_prompt);

        tracing::debug!(
            "Describing {} with {} ({} bytes, {} base64 chars)",
            image_path.display(),
            self.model,
            bytes.len(),
            encoded.len()
        );

        let label = format!("Describe {}", image_path.display());
        let text = self
            .retry
            .run(&label, AppError::is_transient, |_| self.request_once(prompt, &encoded))
            .await?;

        tracing::debug!("Model answered for {}: {}", image_path.display(), text);
        Ok(text)
    }

    async fn probe(&self) -> bool {
        let url = self.url_for("/api/tags");
        match self.client.get(url.clone()).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", url, e);
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.url_for("/api/tags");
        let response = self
            .client
            .get(url.clone())
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("GET {}: {}", url, e)))?;

        if response.status() != StatusCode::OK {
            return Err(AppError::Connection(format!(
                "GET {} returned HTTP {}",
                url,
                response.status().as_u16()
            )));
        }

        let text = self.read_body(response).await?;
        let tags: TagsResponse = parse_json(&text)?;
        Ok(tags.models)
    }
}

/// Returns `true` once a chunk with `done: true` has been consumed.
fn append_chunk(line: &[u8], text: &mut String) -> bool {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    match serde_json::from_str::<GenerateResponse>(line) {
        Ok(chunk) => {
            if let Some(fragment) = chunk.response {
                text.push_str(&fragment);
            }
            chunk.done
        }
        Err(e) => {
            tracing::warn!("Skipping undecodable stream line ({}): {}", e, line);
            false
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| AppError::InvalidResponse(format!("malformed JSON ({}): {}", e, truncate(text))))
}

fn non_empty(text: Option<String>, field: &str) -> Result<String> {
    match text {
        None => Err(AppError::InvalidResponse(format!("missing '{}' field", field))),
        Some(t) if t.trim().is_empty() => {
            Err(AppError::InvalidResponse("model returned an empty description".into()))
        }
        Some(t) => Ok(t.trim().to_string()),
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Seen {
        hits: Arc<AtomicUsize>,
        last_body: Arc<Mutex<Option<Value>>>,
    }

    impl Seen {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/generate", addr)
    }

    fn config(endpoint: String) -> OllamaConfig {
        OllamaConfig {
            endpoint,
            model: "llava".into(),
            timeout: 2.0,
            retry_attempts: 3,
            retry_delay: 0.01,
            ..OllamaConfig::default()
        }
    }

    fn client(config: &OllamaConfig) -> OllamaClient {
        OllamaClient::new(config, "Describe this image in 4-5 words").unwrap()
    }

    fn image_file() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cat.jpg");
        std::fs::write(&path, b"\xFF\xD8\xFFfake jpeg bytes").unwrap();
        (dir, path)
    }

    /// Route that records each request and answers with `status` + `body`
    fn canned(seen: Seen, route: &str, status: AxumStatus, body: &'static str) -> Router {
        Router::new()
            .route(
                route,
                post(move |State(seen): State<Seen>, Json(req): Json<Value>| async move {
                    seen.hits.fetch_add(1, Ordering::SeqCst);
                    *seen.last_body.lock().unwrap() = Some(req);
                    (status, body).into_response()
                }),
            )
            .with_state(seen)
    }

    #[tokio::test]
    async fn generate_returns_trimmed_text_and_sends_image() {
        let seen = Seen::default();
        let url = serve(canned(
            seen.clone(),
            "/api/generate",
            AxumStatus::OK,
            r#"{"response": "  A cat on a mat. ", "done": true}"#,
        ))
        .await;
        let (_dir, path) = image_file();

        let text = client(&config(url)).describe(&path, None).await.unwrap();

        assert_eq!(text, "A cat on a mat.");
        let body = seen.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "llava");
        assert_eq!(body["prompt"], "Describe this image in 4-5 words");
        assert_eq!(body["stream"], false);
        assert_eq!(
            body["images"][0],
            STANDARD.encode(b"\xFF\xD8\xFFfake jpeg bytes")
        );
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_the_limit() {
        let seen = Seen::default();
        let url = serve(canned(seen.clone(), "/api/generate", AxumStatus::INTERNAL_SERVER_ERROR, "boom")).await;
        let (_dir, path) = image_file();

        let err = client(&config(url)).describe(&path, None).await.unwrap_err();

        assert!(matches!(err, AppError::Service { status: 500, .. }));
        assert_eq!(seen.hits(), 3);
    }

    #[tokio::test]
    async fn empty_response_is_invalid_without_retry() {
        let seen = Seen::default();
        let url = serve(canned(seen.clone(), "/api/generate", AxumStatus::OK, r#"{"response": ""}"#)).await;
        let (_dir, path) = image_file();

        let err = client(&config(url)).describe(&path, None).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidResponse(_)));
        assert_eq!(seen.hits(), 1);
    }

    #[tokio::test]
    async fn malformed_json_and_missing_field_are_invalid() {
        let (_dir, path) = image_file();

        let url = serve(canned(Seen::default(), "/api/generate", AxumStatus::OK, "not json")).await;
        let err = client(&config(url)).describe(&path, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidResponse(_)));

        let url = serve(canned(Seen::default(), "/api/generate", AxumStatus::OK, r#"{"done": true}"#)).await;
        let err = client(&config(url)).describe(&path, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let seen = Seen::default();
        let url = serve(canned(seen.clone(), "/api/generate", AxumStatus::NOT_FOUND, "")).await;
        let (_dir, path) = image_file();

        let err = client(&config(url)).describe(&path, None).await.unwrap_err();

        assert!(matches!(err, AppError::ServiceNotFound(_)));
        assert!(err.is_connection());
        assert_eq!(seen.hits(), 1);
    }

    #[tokio::test]
    async fn other_client_errors_are_invalid_responses() {
        let seen = Seen::default();
        let url = serve(canned(seen.clone(), "/api/generate", AxumStatus::BAD_REQUEST, "bad")).await;
        let (_dir, path) = image_file();

        let err = client(&config(url)).describe(&path, None).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidResponse(_)));
        assert_eq!(seen.hits(), 1);
    }

    #[tokio::test]
    async fn slow_server_times_out_after_every_attempt() {
        let seen = Seen::default();
        let router = Router::new()
            .route(
                "/api/generate",
                post(|State(seen): State<Seen>| async move {
                    seen.hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({"response": "too late"}))
                }),
            )
            .with_state(seen.clone());
        let url = serve(router).await;
        let (_dir, path) = image_file();

        let mut cfg = config(url);
        cfg.timeout = 0.2;
        cfg.retry_attempts = 2;
        let err = client(&cfg).describe(&path, None).await.unwrap_err();

        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(seen.hits(), 2);
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let seen = Seen::default();
        let router = Router::new()
            .route(
                "/api/generate",
                post(|State(seen): State<Seen>| async move {
                    seen.hits.fetch_add(1, Ordering::SeqCst);
                    let first = futures::stream::once(async {
                        Ok::<_, std::io::Error>(axum::body::Bytes::from_static(
                            b"{\"response\": \"A dog\", \"done\": false}\n",
                        ))
                    });
                    axum::body::Body::from_stream(first.chain(futures::stream::pending()))
                }),
            )
            .with_state(seen.clone());
        let url = serve(router).await;
        let (_dir, path) = image_file();

        let mut cfg = config(url);
        cfg.stream = true;
        cfg.timeout = 0.3;
        cfg.retry_attempts = 1;
        let err = tokio::time::timeout(Duration::from_secs(5), client(&cfg).describe(&path, None))
            .await
            .expect("stream was never cut off")
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout(_)), "{err:?}");
        assert_eq!(seen.hits(), 1);
    }

    #[test]
    fn backoff_from_config_is_used() {
        let mut cfg = config("http://127.0.0.1:9/api/generate".into());
        cfg.retry_backoff = 3.0;
        assert_eq!(client(&cfg).retry.multiplier, 3.0);
    }

    #[tokio::test]
    async fn refused_connection_surfaces_as_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (_dir, path) = image_file();

        let err = client(&config(format!("http://{}/api/generate", addr)))
            .describe(&path, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Connection(_)));
    }

    #[tokio::test]
    async fn unreadable_image_fails_before_any_request() {
        let seen = Seen::default();
        let url = serve(canned(seen.clone(), "/api/generate", AxumStatus::OK, r#"{"response": "x"}"#)).await;
        let dir = TempDir::new().unwrap();

        let err = client(&config(url))
            .describe(&dir.path().join("gone.jpg"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::CorruptedImage { .. }));
        assert_eq!(seen.hits(), 0);
    }

    #[tokio::test]
    async fn streaming_concatenates_fragments_and_skips_garbage() {
        let body = concat!(
            "{\"response\": \"A dog\", \"done\": false}\n",
            "garbage line\n",
            "{\"response\": \" in snow\", \"done\": false}\n",
            "{\"response\": \"\", \"done\": true}\n",
            "{\"response\": \" ignored\", \"done\": false}\n",
        );
        let seen = Seen::default();
        let url = serve(canned(seen.clone(), "/api/generate", AxumStatus::OK, body)).await;
        let (_dir, path) = image_file();

        let mut cfg = config(url);
        cfg.stream = true;
        let text = client(&cfg).describe(&path, Some("What is this?")).await.unwrap();

        assert_eq!(text, "A dog in snow");
        let sent = seen.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(sent["stream"], true);
        assert_eq!(sent["prompt"], "What is this?");
    }

    #[tokio::test]
    async fn chat_style_posts_messages() {
        let seen = Seen::default();
        let url = serve(canned(
            seen.clone(),
            "/api/chat",
            AxumStatus::OK,
            r#"{"message": {"role": "assistant", "content": "Two birds on a wire"}}"#,
        ))
        .await;
        let (_dir, path) = image_file();

        let mut cfg = config(url);
        cfg.api = ApiStyle::Chat;
        let text = client(&cfg).describe(&path, None).await.unwrap();

        assert_eq!(text, "Two birds on a wire");
        let sent = seen.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(sent["messages"][0]["role"], "user");
        assert_eq!(sent["messages"][0]["images"].as_array().unwrap().len(), 1);
        assert_eq!(sent["stream"], false);
    }

    #[tokio::test]
    async fn probe_and_list_models_use_tags_endpoint() {
        let router = Router::new().route(
            "/api/tags",
            get(|| async {
                Json(json!({
                    "models": [
                        {"name": "llava:latest", "size": 4_700_000_000u64, "modified_at": "2024-05-01T10:00:00Z"},
                        {"name": "bakllava"}
                    ]
                }))
            }),
        );
        let url = serve(router).await;
        let client = client(&config(url));

        assert!(client.probe().await);
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llava:latest");
        assert_eq!(models[0].size_label(), "4.7 GB");
        assert_eq!(models[1].size, None);
    }

    #[tokio::test]
    async fn probe_is_false_when_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(&config(format!("http://{}/api/generate", addr)));
        assert!(!client.probe().await);
        assert!(matches!(client.list_models().await.unwrap_err(), AppError::Connection(_)));
    }
}
