//! Structured-record extraction on top of an [`LlmProvider`].

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use falcon_core::config::LlmConfig;
use falcon_core::{ExtractionSpec, PageContent, Row};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::prompt;
use crate::provider::{LlmError, LlmProvider, Message};
use crate::providers::create_provider;

/// Keys under which models tend to nest the record array.
const WRAPPER_KEYS: &[&str] = &["data", "items", "results", "rows", "records"];

static RE_FLAT_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("could not parse model output as records: {0}")]
    Unparseable(String),

    #[error("extractor not configured: {0}")]
    NotConfigured(String),
}

/// Turns page content plus an extraction spec into records.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, content: &PageContent, spec: &ExtractionSpec) -> Result<Vec<Row>, ExtractError>;

    fn is_configured(&self) -> bool {
        true
    }
}

pub struct LlmExtractor {
    provider: Result<Arc<dyn LlmProvider>, String>,
    temperature: f32,
    max_tokens: u32,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            provider: Ok(provider),
            temperature,
            max_tokens,
            min_interval: Duration::from_secs(1),
            last_call: Mutex::new(None),
        }
    }

    /// Build from config. A missing key yields an extractor that fails every
    /// call with `NotConfigured` instead of refusing to start.
    pub fn from_config(config: &LlmConfig) -> Self {
        let provider: Result<Arc<dyn LlmProvider>, String> = create_provider(config)
            .map(Arc::from)
            .map_err(|e| e.to_string());
        if let Err(reason) = &provider {
            warn!(%reason, "AI extractor unavailable");
        }
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            min_interval: Duration::from_secs(1),
            last_call: Mutex::new(None),
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Space provider calls at least `min_interval` apart.
    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready = prev + self.min_interval;
            if ready > Instant::now() {
                debug!(wait_ms = (ready - Instant::now()).as_millis() as u64, "rate limiting AI request");
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, content: &PageContent, spec: &ExtractionSpec) -> Result<Vec<Row>, ExtractError> {
        let provider = self
            .provider
            .as_ref()
            .map_err(|reason| ExtractError::NotConfigured(reason.clone()))?;

        if content.text.chars().count() > prompt::MAX_CONTENT_CHARS {
            warn!(url = %content.url, max_chars = prompt::MAX_CONTENT_CHARS, "content truncated for AI extraction");
        }
        let messages = vec![
            Message::system(prompt::SYSTEM_PROMPT),
            Message::user(prompt::build(content, spec)),
        ];

        self.throttle().await;
        info!(provider = provider.name(), data_type = %spec.data_type, "requesting AI extraction");
        let raw = provider
            .complete(messages, self.temperature, self.max_tokens)
            .await?;

        let rows = parse_rows(&raw)?;
        info!(rows = rows.len(), "AI extraction parsed");
        Ok(rows)
    }

    fn is_configured(&self) -> bool {
        self.provider.is_ok()
    }
}

/// Parse model output into records, falling back to progressively looser
/// readings before giving up.
pub fn parse_rows(raw: &str) -> Result<Vec<Row>, ExtractError> {
    let cleaned = strip_code_fences(raw.trim());

    if let Some(rows) = serde_json::from_str::<Value>(cleaned).ok().and_then(rows_from_value) {
        return Ok(rows);
    }

    if let (Some(start), Some(end)) = (cleaned.find('['), cleaned.rfind(']')) {
        if start < end {
            if let Some(rows) = serde_json::from_str::<Value>(&cleaned[start..=end])
                .ok()
                .and_then(rows_from_value)
            {
                return Ok(rows);
            }
        }
    }

    let scattered: Vec<Row> = RE_FLAT_OBJECT
        .find_iter(cleaned)
        .filter_map(|m| match serde_json::from_str::<Value>(m.as_str()) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .collect();
    if !scattered.is_empty() {
        info!(rows = scattered.len(), "fallback parse recovered records");
        return Ok(scattered);
    }

    let preview: String = cleaned.chars().take(200).collect();
    Err(ExtractError::Unparseable(preview))
}

fn rows_from_value(value: Value) -> Option<Vec<Row>> {
    match value {
        Value::Array(items) => {
            let total = items.len();
            let rows: Vec<Row> = items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            if rows.len() < total {
                warn!(dropped = total - rows.len(), "ignoring non-object array entries");
            }
            Some(rows)
        }
        Value::Object(mut map) => {
            for key in WRAPPER_KEYS {
                if matches!(map.get(*key), Some(Value::Array(_))) {
                    return map.remove(*key).and_then(rows_from_value);
                }
            }
            Some(vec![map])
        }
        _ => None,
    }
}

fn strip_code_fences(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    use falcon_core::FetchMethod;

    use super::*;

    struct ScriptedProvider {
        reply: Result<String, u16>,
        prompts: StdMutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: Vec<Message>, _t: f32, _m: u32) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(messages);
            match &self.reply {
                Ok(r) => Ok(r.clone()),
                Err(status) => Err(LlmError::ApiError {
                    status: *status,
                    body: "quota".into(),
                }),
            }
        }
    }

    fn page() -> PageContent {
        PageContent {
            url: "https://example.org/list".into(),
            title: "Products".into(),
            meta_description: String::new(),
            html: String::new(),
            text: "Widget 9.99 Gadget 19.99".into(),
            social_links: BTreeMap::new(),
            emails: vec![],
            method: FetchMethod::Rendered,
            exploration: None,
        }
    }

    fn spec() -> ExtractionSpec {
        ExtractionSpec {
            data_type: "products".into(),
            instructions: None,
        }
    }

    #[test]
    fn test_parse_plain_array() {
        let rows = parse_rows(r#"[{"name": "Widget"}, {"name": "Gadget"}]"#).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], "Gadget");
    }

    #[test]
    fn test_parse_fenced_array_with_chatter() {
        let raw = "```json\nHere you go: [{\"name\": \"Widget\"}] hope it helps\n```";
        let rows = parse_rows(raw).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_parse_single_object_and_wrapper() {
        assert_eq!(parse_rows(r#"{"name": "Solo"}"#).unwrap().len(), 1);
        let rows = parse_rows(r#"{"items": [{"a": 1}, {"a": 2}, 3]}"#).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_parse_newline_separated_objects() {
        let raw = "{\"name\": \"A\"}\n{\"name\": \"B\"}\n{\"name\": \"C\"}";
        assert_eq!(parse_rows(raw).unwrap().len(), 3);
    }

    #[test]
    fn test_parse_empty_array_is_zero_rows() {
        assert!(parse_rows("[]").unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_output() {
        let err = parse_rows("I could not find any products on this page.").unwrap_err();
        assert!(matches!(err, ExtractError::Unparseable(_)));
    }

    #[tokio::test]
    async fn test_extract_sends_system_and_user_prompt() {
        let provider = ScriptedProvider::replying(r#"[{"name": "Widget", "price": "9.99"}]"#);
        let extractor = LlmExtractor::new(provider.clone(), 0.1, 4096);
        let rows = extractor.extract(&page(), &spec()).await.unwrap();
        assert_eq!(rows.len(), 1);

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].len(), 2);
        assert!(prompts[0][1].content.contains("Extract: products"));
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let provider = Arc::new(ScriptedProvider {
            reply: Err(429),
            prompts: StdMutex::new(Vec::new()),
        });
        let err = LlmExtractor::new(provider, 0.1, 4096)
            .extract(&page(), &spec())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Provider(LlmError::ApiError { status: 429, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced_by_min_interval() {
        let extractor = LlmExtractor::new(ScriptedProvider::replying("[]"), 0.1, 4096);
        let start = Instant::now();
        extractor.extract(&page(), &spec()).await.unwrap();
        extractor.extract(&page(), &spec()).await.unwrap();
        extractor.extract(&page(), &spec()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unconfigured_extractor_fails_each_call() {
        let config = LlmConfig {
            provider: "gemini".into(),
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".into(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".into(),
            openai_base_url: "https://api.openai.com".into(),
            temperature: 0.1,
            max_tokens: 4096,
        };
        let extractor = LlmExtractor::from_config(&config);
        assert!(!extractor.is_configured());
        let err = extractor.extract(&page(), &spec()).await.unwrap_err();
        assert!(matches!(err, ExtractError::NotConfigured(_)));
    }
}
