//! Generative AI collaborators: research, media description and text rewrites.
//!
//! [`AiService`] is the seam the workspace talks to. [`GeminiClient`] speaks
//! the Gemini `generateContent` REST API; it is built explicitly from
//! [`crate::Config`] and shared as `Arc<dyn AiService>`.

use crate::errors::AiError;
use crate::links::strip_links;
use crate::models::{ResearchResult, Source};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[async_trait]
pub trait AiService: Send + Sync {
    /// Web-grounded answer with its sources, deduplicated by uri.
    async fn research(&self, query: &str) -> Result<ResearchResult, AiError>;

    async fn analyze_image(&self, data: &[u8], mime_type: &str) -> Result<String, AiError>;

    async fn transcribe_audio(&self, data: &[u8], mime_type: &str) -> Result<String, AiError>;

    /// Rewrite `context` following `instruction`.
    async fn enhance_text(&self, instruction: &str, context: &str) -> Result<String, AiError>;

    /// `body` with `[[...]]` links inserted around mentions of `titles`. The
    /// surrounding text must come back unchanged.
    async fn auto_connect(&self, body: &str, titles: &[String]) -> Result<String, AiError>;
}

// ============================================================================
// Gemini REST client
// ============================================================================

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::NotConfigured);
        }
        let base_url = validate_base_url(&base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate(&self, parts: Vec<Value>, search: bool) -> Result<GenerateResponse, AiError> {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        if search {
            body["tools"] = json!([{ "google_search": {} }]);
        }

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "gemini request failed");
            return Err(AiError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        resp.json::<GenerateResponse>()
            .await
            .map_err(|e| AiError::InvalidResponse {
                reason: e.to_string(),
            })
    }

    async fn generate_text(&self, parts: Vec<Value>) -> Result<String, AiError> {
        self.generate(parts, false).await?.text()
    }
}

/// Only absolute http(s) URLs; the API key is sent to this host.
fn validate_base_url(raw: &str) -> Result<String, AiError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| AiError::InvalidBaseUrl {
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => {
            Ok(parsed.as_str().trim_end_matches('/').to_string())
        }
        scheme => Err(AiError::InvalidBaseUrl {
            reason: format!("unsupported scheme or missing host: {}", scheme),
        }),
    }
}

fn text_part(text: impl Into<String>) -> Value {
    json!({ "text": text.into() })
}

fn inline_part(data: &[u8], mime_type: &str) -> Value {
    json!({
        "inline_data": {
            "mime_type": mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(data),
        }
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

/// Models like to wrap rewritten text in a code fence.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match rest.find('\n') {
        Some(i) => rest[i + 1..].trim(),
        None => rest.trim(),
    }
}

#[async_trait]
impl AiService for GeminiClient {
    async fn research(&self, query: &str) -> Result<ResearchResult, AiError> {
        let prompt = format!(
            "Research the following topic using web search and write a concise, \
             well-structured markdown summary for a personal knowledge base.\n\nTopic: {}",
            query
        );
        let resp = self.generate(vec![text_part(prompt)], true).await?;
        let sources = resp.sources();
        Ok(ResearchResult {
            text: resp.text()?,
            sources,
        })
    }

    async fn analyze_image(&self, data: &[u8], mime_type: &str) -> Result<String, AiError> {
        self.generate_text(vec![
            inline_part(data, mime_type),
            text_part("Describe this image in markdown for a note. Transcribe any visible text."),
        ])
        .await
    }

    async fn transcribe_audio(&self, data: &[u8], mime_type: &str) -> Result<String, AiError> {
        self.generate_text(vec![
            inline_part(data, mime_type),
            text_part("Transcribe this audio recording verbatim. Return only the transcript."),
        ])
        .await
    }

    async fn enhance_text(&self, instruction: &str, context: &str) -> Result<String, AiError> {
        let prompt = format!(
            "{}\n\nReturn only the rewritten markdown, keep existing [[wiki links]] intact.\n\n---\n{}",
            instruction, context
        );
        let text = self.generate_text(vec![text_part(prompt)]).await?;
        Ok(strip_code_fence(&text).to_string())
    }

    async fn auto_connect(&self, body: &str, titles: &[String]) -> Result<String, AiError> {
        let prompt = format!(
            "Insert wiki links into the note below. Wrap an exact mention of one of these \
             note titles in double square brackets, like [[Title]]. Do not change any other \
             character. Return only the note text.\n\nTitles:\n{}\n\nNote:\n{}",
            titles
                .iter()
                .map(|t| format!("- {}", t))
                .collect::<Vec<_>>()
                .join("\n"),
            body
        );
        let text = self.generate_text(vec![text_part(prompt)]).await?;
        verify_auto_connect(body, strip_code_fence(&text))
    }
}

/// Accept `linked` only if removing link syntax gives back `original`.
pub fn verify_auto_connect(original: &str, linked: &str) -> Result<String, AiError> {
    if strip_links(linked).trim() == strip_links(original).trim() {
        Ok(linked.to_string())
    } else {
        Err(AiError::InvalidResponse {
            reason: "auto-connect changed text outside of links".to_string(),
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize, Default)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize, Default)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Result<String, AiError> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            Err(AiError::EmptyResponse)
        } else {
            Ok(text)
        }
    }

    /// Web sources in the order returned, first occurrence of each uri kept.
    fn sources(&self) -> Vec<Source> {
        let mut seen = HashSet::new();
        self.candidates
            .iter()
            .filter_map(|c| c.grounding_metadata.as_ref())
            .flat_map(|m| m.grounding_chunks.iter())
            .filter_map(|chunk| chunk.web.as_ref())
            .filter_map(|web| {
                let uri = web.uri.clone()?;
                seen.insert(uri.clone()).then(|| Source {
                    title: web.title.clone().unwrap_or_else(|| uri.clone()),
                    uri,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL: &str = "gemini-test";
    const ENDPOINT: &str = "/models/gemini-test:generateContent";

    fn text_response(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    async fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new("test_key", MODEL, server.uri()).unwrap()
    }

    // ---- research ----

    #[tokio::test]
    async fn test_research_dedupes_sources() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("x-goog-api-key", "test_key"))
            .and(body_partial_json(json!({ "tools": [{ "google_search": {} }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Mars " }, { "text": "is red." }] },
                    "groundingMetadata": { "groundingChunks": [
                        { "web": { "uri": "https://a.example", "title": "A" } },
                        { "web": { "uri": "https://b.example", "title": "B" } },
                        { "web": { "uri": "https://a.example", "title": "A again" } }
                    ]}
                }]
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).await.research("mars").await.unwrap();
        assert_eq!(result.text, "Mars is red.");
        let uris: Vec<&str> = result.sources.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, vec!["https://a.example", "https://b.example"]);
        assert_eq!(result.sources[0].title, "A");
    }

    #[tokio::test]
    async fn test_status_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.research("x").await.unwrap_err();
        assert!(matches!(err, AiError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_empty_candidates_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .enhance_text("fix", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::EmptyResponse));
    }

    // ---- media ----

    #[tokio::test]
    async fn test_image_is_sent_inline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(body_partial_json(json!({
                "contents": [{ "parts": [{ "inline_data": { "mime_type": "image/png", "data": "AQID" } }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("A chart.")))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .await
            .analyze_image(&[1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(text, "A chart.");
    }

    // ---- rewrites ----

    #[tokio::test]
    async fn test_enhance_strips_code_fence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("```markdown\n# Better\n```")))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .await
            .enhance_text("improve", "# ok")
            .await
            .unwrap();
        assert_eq!(text, "# Better");
    }

    #[tokio::test]
    async fn test_auto_connect_accepts_link_only_changes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("I like [[Space]] a lot")))
            .mount(&server)
            .await;

        let linked = client_for(&server)
            .await
            .auto_connect("I like Space a lot", &["Space".to_string()])
            .await
            .unwrap();
        assert_eq!(linked, "I like [[Space]] a lot");
    }

    #[tokio::test]
    async fn test_auto_connect_rejects_rewritten_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("I love [[Space]]")))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .auto_connect("I like Space a lot", &["Space".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse { .. }));
    }

    #[test]
    fn test_base_url_must_be_http() {
        assert!(matches!(
            GeminiClient::new("k", MODEL, "file:///etc/passwd"),
            Err(AiError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            GeminiClient::new("k", MODEL, "not a url"),
            Err(AiError::InvalidBaseUrl { .. })
        ));
        let client = GeminiClient::new("k", MODEL, "https://example.com/v1beta/").unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.com/v1beta/models/gemini-test:generateContent"
        );
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        assert!(matches!(
            GeminiClient::new("  ", MODEL, DEFAULT_BASE_URL),
            Err(AiError::NotConfigured)
        ));
    }
}
