//! Grok chat-completions client used by the `search` worker

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::core::config::EffectiveConfig;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Grok Search, an evidence-focused AI researcher. \
Run the provider's live search when available, synthesize the answer, \
and list the best sources in plain text. Always keep answers concise.";

const ERROR_DETAIL_LIMIT: usize = 400;

#[derive(Debug, Error)]
pub enum GrokError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("network error")]
    Network(#[source] reqwest::Error),

    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("upstream returned invalid JSON: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GrokError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GrokError::Timeout {
                endpoint: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            GrokError::Network(e.without_url())
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: u8,
    stream: bool,
}

/// A cited source, normalised from whatever shape the provider returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchAnswer {
    pub ok: bool,
    pub content: String,
    pub sources: Vec<Source>,
}

impl SearchAnswer {
    /// Plain-text rendering written to stdout for the MCP client.
    pub fn render_text(&self) -> String {
        let mut output = self.content.clone();
        if !self.sources.is_empty() {
            output.push_str("\n\nSources:\n");
            for (i, source) in self.sources.iter().enumerate() {
                let label = source
                    .title
                    .as_deref()
                    .or(source.url.as_deref())
                    .unwrap_or("(untitled)");
                output.push_str(&format!("{}. {}", i + 1, label));
                if let (Some(url), Some(_)) = (&source.url, &source.title) {
                    output.push_str(&format!(" <{}>", url));
                }
                output.push('\n');
                if let Some(snippet) = &source.snippet {
                    output.push_str(&format!("   {}\n", snippet));
                }
            }
        }
        output.trim_end().to_string()
    }
}

pub struct GrokClient {
    client: reqwest::Client,
    config: EffectiveConfig,
}

impl GrokClient {
    pub fn new(config: EffectiveConfig) -> Result<Self, GrokError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(GrokError::Network)?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> String {
        build_endpoint(&self.config.base_url)
    }

    pub fn request_body(&self, query: &str) -> Value {
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: query,
                },
            ],
            temperature: 0,
            stream: false,
        };

        let mut body = json!(request);
        if let Value::Object(map) = &mut body {
            map.extend(self.config.extra_body.clone());
        }
        body
    }

    pub async fn search(&self, query: &str) -> Result<SearchAnswer, GrokError> {
        let endpoint = self.endpoint();
        tracing::debug!(endpoint = %endpoint, model = %self.config.model, "calling upstream");

        let mut request = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");
        for (name, value) in &self.config.extra_headers {
            request = request.header(name.as_str(), header_value(value));
        }

        let response = request.json(&self.request_body(query)).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if status.as_u16() >= 400 {
            let detail = truncate(text.trim(), ERROR_DETAIL_LIMIT);
            return Err(GrokError::Http {
                status: status.as_u16(),
                detail: if detail.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    self.config.redact(&detail)
                },
            });
        }

        let payload: Value = serde_json::from_str(&text)
            .map_err(|_| GrokError::InvalidResponse(truncate(&text, ERROR_DETAIL_LIMIT)))?;

        Ok(SearchAnswer {
            ok: true,
            content: extract_message_text(&payload),
            sources: extract_sources(&payload),
        })
    }
}

fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `https://api.x.ai` and `https://api.x.ai/v1/` both map to
/// `https://api.x.ai/v1/chat/completions`.
pub fn build_endpoint(base_url: &str) -> String {
    let cleaned = base_url.trim_end_matches('/');
    if cleaned.ends_with("/v1") {
        format!("{}/chat/completions", cleaned)
    } else {
        format!("{}/v1/chat/completions", cleaned)
    }
}

pub fn extract_message_text(payload: &Value) -> String {
    if let Some(message) = first_message(payload) {
        match message.get("content") {
            Some(Value::String(s)) => return s.trim().to_string(),
            Some(Value::Array(parts)) => {
                return parts
                    .iter()
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            _ => {}
        }
    }
    payload.to_string()
}

fn first_message(payload: &Value) -> Option<&Map<String, Value>> {
    payload
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .as_object()
}

const SOURCE_KEYS: [&str; 3] = ["citations", "sources", "references"];

pub fn extract_sources(payload: &Value) -> Vec<Source> {
    let from_message = first_message(payload).and_then(|message| {
        SOURCE_KEYS.iter().find_map(|key| {
            non_empty(message.get(*key)).or_else(|| {
                non_empty(message.get("metadata").and_then(|m| m.get(*key)))
            })
        })
    });
    let raw = from_message.or_else(|| {
        ["sources", "citations", "references"]
            .iter()
            .find_map(|key| non_empty(payload.get(*key)))
    });

    raw.and_then(Value::as_array)
        .map(|items| items.iter().filter_map(normalize_source).collect())
        .unwrap_or_default()
}

fn non_empty(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(b) => *b,
        Value::Number(_) => true,
    })
}

fn normalize_source(entry: &Value) -> Option<Source> {
    match entry {
        Value::String(url) => Some(Source {
            url: Some(url.clone()),
            ..Default::default()
        }),
        Value::Object(obj) => {
            let pick = |keys: [&str; 2]| {
                keys.iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            let source = Source {
                url: pick(["url", "href"]),
                title: pick(["title", "name"]),
                snippet: pick(["snippet", "quote"]),
            };
            (source != Source::default()).then_some(source)
        }
        _ => None,
    }
}

pub fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let kept: String = value.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigLayer;

    fn client(extra_body: Option<Map<String, Value>>) -> GrokClient {
        let config = ConfigLayer {
            base_url: Some("https://api.x.ai/".to_string()),
            api_key: Some("k".to_string()),
            model: Some("grok-test".to_string()),
            extra_body,
            ..Default::default()
        }
        .finish()
        .unwrap();
        GrokClient::new(config).unwrap()
    }

    #[test]
    fn test_build_endpoint() {
        assert_eq!(
            build_endpoint("https://api.x.ai"),
            "https://api.x.ai/v1/chat/completions"
        );
        assert_eq!(
            build_endpoint("https://api.x.ai/v1/"),
            "https://api.x.ai/v1/chat/completions"
        );
        assert_eq!(
            build_endpoint("http://localhost:8080/proxy"),
            "http://localhost:8080/proxy/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_merges_extra_body() {
        let extra = json!({"search_parameters": {"mode": "on"}, "temperature": 0.3});
        let client = client(extra.as_object().cloned());
        let body = client.request_body("latest rust release");

        assert_eq!(body["model"], "grok-test");
        assert_eq!(body["stream"], false);
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["search_parameters"]["mode"], "on");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "latest rust release");
        assert_eq!(client.endpoint(), "https://api.x.ai/v1/chat/completions");
    }

    #[test]
    fn test_extract_message_text_string() {
        let payload = json!({"choices": [{"message": {"content": "  answer  "}}]});
        assert_eq!(extract_message_text(&payload), "answer");
    }

    #[test]
    fn test_extract_message_text_parts() {
        let payload = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "first"},
            {"type": "image", "url": "x"},
            {"type": "text", "text": " second "}
        ]}}]});
        assert_eq!(extract_message_text(&payload), "first\nsecond");
    }

    #[test]
    fn test_extract_message_text_falls_back_to_raw() {
        let payload = json!({"unexpected": true});
        assert_eq!(extract_message_text(&payload), r#"{"unexpected":true}"#);
    }

    #[test]
    fn test_extract_sources_from_message() {
        let payload = json!({"choices": [{"message": {
            "content": "x",
            "citations": [
                "https://a.example",
                {"href": "https://b.example", "name": "B", "quote": "q"},
                {"irrelevant": 1},
                42
            ]
        }}]});
        let sources = extract_sources(&payload);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].url.as_deref(), Some("https://a.example"));
        assert_eq!(sources[1].title.as_deref(), Some("B"));
        assert_eq!(sources[1].snippet.as_deref(), Some("q"));
    }

    #[test]
    fn test_extract_sources_from_metadata_and_top_level() {
        let payload = json!({"choices": [{"message": {
            "content": "x",
            "metadata": {"references": [{"url": "https://m.example"}]}
        }}]});
        assert_eq!(extract_sources(&payload)[0].url.as_deref(), Some("https://m.example"));

        let payload = json!({"choices": [{"message": {"content": "x"}}], "citations": ["https://t.example"]});
        assert_eq!(extract_sources(&payload)[0].url.as_deref(), Some("https://t.example"));

        let payload = json!({"choices": []});
        assert!(extract_sources(&payload).is_empty());
    }

    #[test]
    fn test_render_text_lists_sources() {
        let answer = SearchAnswer {
            ok: true,
            content: "Rust 1.80 shipped.".to_string(),
            sources: vec![
                Source {
                    url: Some("https://blog.rust-lang.org".to_string()),
                    title: Some("Rust Blog".to_string()),
                    snippet: None,
                },
                Source {
                    url: Some("https://x.com/rustlang".to_string()),
                    ..Default::default()
                },
            ],
        };
        assert_eq!(
            answer.render_text(),
            "Rust 1.80 shipped.\n\nSources:\n1. Rust Blog <https://blog.rust-lang.org>\n2. https://x.com/rustlang"
        );
    }

    #[tokio::test]
    async fn test_network_error_chain_names_each_cause_once() {
        // Nothing listens on the discard port.
        let config = ConfigLayer {
            base_url: Some("http://127.0.0.1:9".to_string()),
            api_key: Some("k".to_string()),
            timeout_seconds: Some(5),
            ..Default::default()
        }
        .finish()
        .unwrap();
        let err = GrokClient::new(config).unwrap().search("q").await.unwrap_err();
        assert!(matches!(err, GrokError::Network(_)), "{:?}", err);

        let chain = format!("{:#}", anyhow::Error::from(err));
        assert!(chain.starts_with("network error: "), "{}", chain);
        assert_eq!(chain.matches("error sending request").count(), 1, "{}", chain);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
