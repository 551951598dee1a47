//! The seam between the turn loop and the model provider.
//!
//! [`LlmTransport`] is the only thing the harness and the compactor know about
//! the model. [`OpenRouterTransport`] implements it over
//! [`OpenRouterClient`](crate::OpenRouterClient); tests use a scripted fake.

use crate::api::error::LlmError;
use crate::{
    ChatRequest, Message, OpenRouterClient, ReasoningConfig, ReasoningEffort, ToolCall, ToolDef,
    UsageRequest,
};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`LlmTransport::chat`].
pub type LlmFuture<'a> = Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>>;

/// Per-call knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub reasoning: Option<ReasoningEffort>,
}

impl ChatOptions {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning = Some(effort);
        self
    }
}

/// Token counts reported for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cached += other.cached;
    }
}

/// One model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub cost: f64,
    pub finish_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A chat-completion backend.
pub trait LlmTransport: Send + Sync {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [ToolDef]>,
        options: ChatOptions,
    ) -> LlmFuture<'a>;
}

/// [`LlmTransport`] backed by the OpenRouter chat completions API.
pub struct OpenRouterTransport {
    client: OpenRouterClient,
    model: String,
    temperature: f32,
}

impl OpenRouterTransport {
    pub fn new(client: OpenRouterClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn client(&self) -> &OpenRouterClient {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDef]>,
        options: ChatOptions,
    ) -> ChatRequest {
        let tools = tools.filter(|t| !t.is_empty()).map(<[ToolDef]>::to_vec);
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: options.max_tokens,
            temperature: (!rejects_temperature(&self.model)).then_some(self.temperature),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            reasoning: options
                .reasoning
                .filter(|e| *e != ReasoningEffort::None)
                .map(|effort| ReasoningConfig { effort }),
            usage: Some(UsageRequest { include: true }),
        }
    }
}

/// Reasoning-only models reject a `temperature` field.
fn rejects_temperature(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    name.starts_with("o1") || name.starts_with("o3") || name.contains("deepseek-r1")
}

impl LlmTransport for OpenRouterTransport {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [ToolDef]>,
        options: ChatOptions,
    ) -> LlmFuture<'a> {
        Box::pin(async move {
            let request = self.build_request(messages, tools, options);
            let completion = self.client.chat(&request).await?;
            let usage = completion.usage.as_ref().map_or_else(TokenUsage::default, |u| TokenUsage {
                input: u64::from(u.prompt_tokens.unwrap_or(0)),
                output: u64::from(u.completion_tokens.unwrap_or(0)),
                cached: u64::from(u.cached_tokens()),
            });
            Ok(LlmResponse {
                text: completion.content.unwrap_or_default(),
                tool_calls: completion.tool_calls,
                usage,
                cost: completion.cost,
                finish_reason: completion.finish_reason,
            })
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted transport for loop and compaction tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued results in order and records every request.
    /// When the queue is empty it answers with plain "done" text.
    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
        pub calls: Mutex<Vec<RecordedCall>>,
    }

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub messages: Vec<Message>,
        pub tool_count: usize,
        pub options: ChatOptions,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<LlmResponse, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn recorded(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LlmTransport for ScriptedTransport {
        fn chat<'a>(
            &'a self,
            messages: &'a [Message],
            tools: Option<&'a [ToolDef]>,
            options: ChatOptions,
        ) -> LlmFuture<'a> {
            self.calls.lock().unwrap().push(RecordedCall {
                messages: messages.to_vec(),
                tool_count: tools.map_or(0, <[ToolDef]>::len),
                options,
            });
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LlmResponse::text("done")));
            Box::pin(async move { next })
        }
    }
}
