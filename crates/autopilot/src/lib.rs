//! Autonomous tool-calling agent loop with token-budgeted context management.
//!
//! `autopilot` drives a multi-turn conversation against an LLM until a task is
//! judged complete. The model calls tools, the harness executes them and feeds
//! the results back, and a verification protocol makes the model double-check
//! its work before the run is allowed to stop. The core abstraction is the
//! [`Harness`](agent::harness::Harness); everything else exists to keep its
//! transcript inside a hard token budget without breaking the chat protocol.
//!
//! # Getting started
//!
//! ```ignore
//! use autopilot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LlmError> {
//!     let api_key = std::env::var("OPENROUTER_API_KEY").unwrap();
//!     let client = OpenRouterClient::new(api_key)?;
//!     let transport = OpenRouterTransport::new(client, "anthropic/claude-sonnet-4");
//!
//!     let tools = ToolSet::new().with_builtin_tools();
//!     let ctx = LocalContext::new("/tmp/work", "Create hello.txt containing 'hi'.");
//!     let config = LoopConfig::new("anthropic/claude-sonnet-4").with_max_iterations(50);
//!
//!     let handler = JsonlHandler;
//!     let mut session = SessionState::new();
//!     let summary = Harness::new(&transport, &tools, &ctx, config)
//!         .with_event_handler(&handler)
//!         .run(&mut session)
//!         .await;
//!
//!     println!("finished={} cost=${:.4}", summary.finished, summary.cost);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **The turn loop:** [`Harness`](agent::harness::Harness),
//!   [`LoopConfig`](agent::config::LoopConfig), the verification transition
//!   table in [`agent::verification`], and lifecycle events in
//!   [`agent::events`].
//! - **Keeping the transcript in budget:** [`context::manager`] composes the
//!   estimator, tool-output pruner, image evictor, AI compactor, and orphan
//!   repair into one call per turn. [`context::cache`] places prompt-cache
//!   breakpoints afterwards.
//! - **Talking to the model:** the [`LlmTransport`](api::transport::LlmTransport)
//!   trait, [`OpenRouterClient`], typed [`LlmError`](api::error::LlmError)
//!   codes, and retry policy in [`api::retry`].
//! - **Tools:** the [`Tool`](tools::core::Tool) trait, the
//!   [`ToolSet`](tools::core::ToolSet) registry, and built-in shell/file/image
//!   tools in [`tools::common`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`Harness`](agent::harness::Harness) turn loop, config, events, session state, verification, agent context |
//! | [`context`] | Token estimation, budget, pruning, image eviction, compaction, orphan repair, cache breakpoints |
//! | [`api`] | Transport trait, typed errors, retry policy, pricing and cost tracking |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet) registry, built-in tools, output truncation |

pub mod agent;
pub mod api;
pub mod context;
pub mod prelude;
pub mod tools;

use crate::api::error::{ErrorCode, LlmError, classify_error_message, classify_http_status};
use crate::api::tracing::{CostTracker, pricing_for_model};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for agent runs.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Tool definitions use this to describe their
/// arguments to the model.
///
/// # Example
///
/// ```
/// use autopilot::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct ReadArgs {
///     file_path: String,
///     #[serde(default)]
///     limit: Option<usize>,
/// }
///
/// let schema = json_schema_for::<ReadArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"file_path".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    /// Ask the provider to report billed cost alongside token counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRequest>,
}

/// Usage accounting switch (`{"include": true}`).
#[derive(Serialize, Debug, Clone, Copy)]
pub struct UsageRequest {
    pub include: bool,
}

/// Reasoning effort level for extended thinking models.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Xhigh,
    High,
    Medium,
    Low,
    Minimal,
    None,
}

impl std::str::FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xhigh" => Ok(Self::Xhigh),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "minimal" => Ok(Self::Minimal),
            "none" => Ok(Self::None),
            other => Err(format!("unknown reasoning effort '{other}'")),
        }
    }
}

/// Configuration for extended thinking / reasoning tokens.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReasoningConfig {
    pub effort: ReasoningEffort,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Provider prompt-cache annotation (`{"type": "ephemeral"}`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            kind: "ephemeral".into(),
        }
    }
}

/// Image reference carried by an image part. Either a remote URL or a
/// `data:` URL with base64 payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
}

/// One element of a multi-part message body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::ImageUrl { .. })
    }

    /// The text of a text part, `None` for images.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text, .. } => Some(text),
            ContentPart::ImageUrl { .. } => None,
        }
    }

    pub fn has_cache_control(&self) -> bool {
        matches!(
            self,
            ContentPart::Text {
                cache_control: Some(_),
                ..
            }
        )
    }
}

/// Message body: a plain string or an ordered list of parts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: Option<MessageContent>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, Some(MessageContent::Text(content.into())))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, Some(MessageContent::Text(content.into())))
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_role(MessageRole::User, Some(MessageContent::Parts(parts)))
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::with_role(
            MessageRole::Assistant,
            Some(MessageContent::Text(content.into())),
        )
    }

    /// Assistant turn that requests tool calls. Empty text is omitted.
    pub fn assistant_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let content = (!text.is_empty()).then_some(MessageContent::Text(text));
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// The body when it is a plain string.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::Text(t)) => Some(t),
            _ => None,
        }
    }

    /// All text in the body, parts joined by newlines.
    pub fn text_content(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(t)) => t.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        }
    }

    /// Number of image parts in the body.
    pub fn image_count(&self) -> usize {
        match &self.content {
            Some(MessageContent::Parts(parts)) => parts.iter().filter(|p| p.is_image()).count(),
            _ => 0,
        }
    }

    /// Tool calls requested by this message (empty for non-assistant roles).
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
    reasoning: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Clean return type from [`OpenRouterClient::chat()`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
    pub reasoning: Option<String>,
    /// Billed cost in USD (provider-reported, else estimated from pricing).
    pub cost: f64,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

impl UsageInfo {
    pub fn cached_tokens(&self) -> u32 {
        self.prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PromptTokensDetails {
    pub cached_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Connection settings for [`OpenRouterClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// HTTP request timeout. Timeouts surface as retryable `api_error`s.
    pub timeout: Duration,
    /// Spend ceiling in USD. Requests are refused once cumulative cost
    /// reaches it.
    pub cost_limit: f64,
    pub referer: String,
    pub title: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            cost_limit: 100.0,
            referer: "https://github.com/autopilot-rs".into(),
            title: "autopilot".into(),
        }
    }
}

/// Async HTTP client for the OpenRouter chat completions API.
///
/// Tracks cumulative usage across requests and refuses new requests once
/// the configured cost limit is reached.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    options: ClientOptions,
    stats: Mutex<CostTracker>,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default options.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LlmError> {
        Self::with_options(api_key, ClientOptions::default())
    }

    pub fn with_options(api_key: impl Into<String>, options: ClientOptions) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .user_agent("autopilot/0.1")
            .timeout(options.timeout)
            .build()
            .map_err(|e| LlmError::new(ErrorCode::ApiError, format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            options,
            stats: Mutex::new(CostTracker::new()),
        })
    }

    /// Snapshot of cumulative usage for this client.
    pub fn stats(&self) -> CostTracker {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn spent(&self) -> f64 {
        self.stats.lock().map_or(0.0, |s| s.total_cost_usd)
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let spent = self.spent();
        if spent >= self.options.cost_limit {
            return Err(LlmError::CostLimitExceeded {
                used: spent,
                limit: self.options.cost_limit,
            });
        }

        let tool_count = body.tools.as_ref().map_or(0, |t| t.len());
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}",
            body.model,
            body.messages.len(),
            tool_count,
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.options.referer)
            .header("X-Title", &self.options.title)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::new(ErrorCode::ApiError, format!("request timed out: {e}"))
                } else {
                    let message = format!("request failed: {e}");
                    LlmError::new(classify_error_message(&message), message)
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::new(ErrorCode::ApiError, format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(LlmError::new(
                classify_http_status(status.as_u16(), &text),
                format!("OpenRouter API HTTP {status}: {text}"),
            ));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::new(ErrorCode::ApiError, format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            let code = match err.code.as_ref().and_then(|c| c.as_u64()) {
                Some(status) => classify_http_status(status as u16, &err.message),
                None => classify_error_message(&err.message),
            };
            return Err(LlmError::new(
                code,
                format!("OpenRouter API error: {}", err.message),
            ));
        }

        let usage = parsed.usage.unwrap_or_default();
        let prompt = usage.prompt_tokens.unwrap_or(0);
        let completion = usage.completion_tokens.unwrap_or(0);
        let cost = usage
            .cost
            .unwrap_or_else(|| pricing_for_model(&body.model).estimate_cost(prompt, completion));
        debug!(
            "Token usage: prompt={prompt}, completion={completion}, cached={}, cost=${cost:.4}",
            usage.cached_tokens(),
        );
        if let Ok(mut stats) = self.stats.lock() {
            stats.record(prompt, completion, usage.cached_tokens(), cost);
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        match choice {
            Some(c) => {
                debug!(
                    "LLM output: {} chars text, {} tool call(s)",
                    c.message.content.as_ref().map_or(0, |s| s.len()),
                    c.message.tool_calls.as_ref().map_or(0, |t| t.len()),
                );
                Ok(ChatCompletion {
                    content: c.message.content,
                    tool_calls: c.message.tool_calls.unwrap_or_default(),
                    usage: Some(usage),
                    finish_reason: c.finish_reason,
                    reasoning: c.message.reasoning,
                    cost,
                })
            }
            None => {
                debug!("LLM output: empty (no choices)");
                Ok(ChatCompletion {
                    content: None,
                    tool_calls: vec![],
                    usage: Some(usage),
                    finish_reason: None,
                    reasoning: None,
                    cost,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.text(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn assistant_tool_calls_omits_empty_text() {
        let msg = Message::assistant_tool_calls("", vec![ToolCall::new("c1", "ls", "{}")]);
        assert!(msg.content.is_none());
        assert_eq!(msg.calls().len(), 1);

        let msg = Message::assistant_tool_calls("looking", vec![]);
        assert_eq!(msg.text(), Some("looking"));
    }

    #[test]
    fn text_content_serializes_as_plain_string() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["content"], "hi");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn parts_serialize_with_type_tags() {
        let msg = Message::user_parts(vec![
            ContentPart::text("look"),
            ContentPart::image("data:image/png;base64,AAAA"),
        ]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert!(json["content"][0].get("cache_control").is_none());
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(msg.image_count(), 1);
    }

    #[test]
    fn parts_deserialize_back() {
        let raw = r#"{"role":"user","content":[{"type":"text","text":"a","cache_control":{"type":"ephemeral"}}]}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        match msg.content {
            Some(MessageContent::Parts(ref parts)) => assert!(parts[0].has_cache_control()),
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn chat_request_skips_none_fields() {
        let req = ChatRequest {
            model: "test-model".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("reasoning").is_none());
        assert_eq!(json["max_tokens"], 100);
    }

    #[test]
    fn reasoning_effort_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<ReasoningEffort>(), Ok(ReasoningEffort::High));
        assert_eq!("none".parse::<ReasoningEffort>(), Ok(ReasoningEffort::None));
        assert!("extreme".parse::<ReasoningEffort>().is_err());
    }

    #[test]
    fn usage_reads_cached_tokens() {
        let usage: UsageInfo = serde_json::from_str(
            r#"{"prompt_tokens":10,"completion_tokens":2,"prompt_tokens_details":{"cached_tokens":7},"cost":0.01}"#,
        )
        .unwrap();
        assert_eq!(usage.cached_tokens(), 7);
        assert_eq!(usage.cost, Some(0.01));
    }

    #[tokio::test]
    async fn client_refuses_requests_past_cost_limit() {
        let client = OpenRouterClient::with_options(
            "key",
            ClientOptions {
                cost_limit: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        let err = client
            .chat(&ChatRequest {
                model: "m".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CostLimitExceeded);
    }
}
