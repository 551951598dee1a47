//! The turn-control loop.
//!
//! The [`Harness`] sends the transcript and tool definitions to the model,
//! executes any returned tool calls through the [`ToolRegistry`], appends the
//! results, and repeats. A response without tool calls starts the
//! verification handshake in [`verification`](super::verification); the run
//! ends when the handshake completes, the cost limit is reached, or the
//! iteration limit runs out.
//!
//! Before every call the transcript passes through the
//! [`ContextManager`](crate::context::ContextManager), so a run can continue
//! well past the model's context window.

use super::config::LoopConfig;
use super::context::{AgentContext, DEFAULT_SHELL_TIMEOUT};
use super::events::{EventHandler, Item, LifecycleEvent, NoopHandler};
use super::execution::{CallOutcome, call_with_retry, fatal_message, image_message, run_tool_calls};
use super::prompts;
use super::session::SessionState;
use super::verification::{self, VerificationPhase, VerificationStep};
use crate::Message;
use crate::api::transport::{LlmResponse, LlmTransport, TokenUsage};
use crate::context::ContextManager;
use crate::context::images::count_images;
use crate::tools::{ToolRegistry, truncate_middle};
use tracing::{debug, info, warn};

/// Images allowed below the provider ceiling before eviction runs mid-turn.
const IMAGE_CEILING_MARGIN: usize = 10;

/// Outcome of [`Harness::run()`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session_id: String,
    /// Model calls attempted, including failed ones.
    pub iterations: u32,
    /// The verification handshake completed.
    pub finished: bool,
    pub usage: TokenUsage,
    /// Accumulated cost in USD.
    pub cost: f64,
    /// Text of the last non-empty model response.
    pub final_message: Option<String>,
    pub transcript: Vec<Message>,
}

/// The agent loop.
///
/// ```ignore
/// let transport = OpenRouterTransport::new(client, &config.model);
/// let tools = ToolSet::new().with_builtin_tools();
/// let ctx = LocalContext::new(cwd, instruction);
/// let handler = JsonlHandler;
///
/// let mut session = SessionState::new();
/// let summary = Harness::new(&transport, &tools, &ctx, config)
///     .with_event_handler(&handler)
///     .run(&mut session)
///     .await;
/// ```
///
/// # Lifetimes
///
/// `Harness<'a>` borrows the transport, tools, context and event handler.
/// Bind them to `let` bindings before building the harness so they outlive
/// `.run()`.
pub struct Harness<'a> {
    transport: &'a dyn LlmTransport,
    tools: &'a dyn ToolRegistry,
    ctx: &'a dyn AgentContext,
    config: LoopConfig,
    manager: ContextManager,
    event_handler: &'a dyn EventHandler,
}

impl<'a> Harness<'a> {
    pub fn new(
        transport: &'a dyn LlmTransport,
        tools: &'a dyn ToolRegistry,
        ctx: &'a dyn AgentContext,
        config: LoopConfig,
    ) -> Self {
        Self {
            transport,
            tools,
            ctx,
            manager: ContextManager::new(config.context.clone()),
            config,
            event_handler: &NoopHandler,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run until done, out of budget, or out of iterations. `session` is
    /// reset first.
    pub async fn run(&self, session: &mut SessionState) -> RunSummary {
        session.reset();
        let handler = self.event_handler;
        let tool_defs = self.tools.definitions();
        info!(
            "Agent run started: session={}, model={}, tools={}",
            session.session_id(),
            self.config.model,
            tool_defs.len()
        );
        handler.on_event(&LifecycleEvent::ThreadStarted {
            thread_id: session.session_id().to_string(),
        });
        handler.on_event(&LifecycleEvent::TurnStarted);

        let instruction = self.ctx.instruction().to_string();
        let mut messages = self.initial_messages(&instruction).await;
        let mut snapshot = messages.clone();

        let mut phase = VerificationPhase::default();
        let mut consecutive_failures = 0;
        let mut iterations = 0;
        let mut finished = false;
        let mut final_message = None;

        while iterations < self.config.max_iterations {
            iterations += 1;
            info!("Iteration {iterations}/{}", self.config.max_iterations);

            let (managed, report) = self.manager.manage(self.transport, messages, false).await;
            messages = managed;
            debug!("Context: {}", report.to_log_string());

            let response = match call_with_retry(
                self.transport,
                &self.config,
                &mut messages,
                &snapshot,
                &tool_defs,
            )
            .await
            {
                CallOutcome::Success(response) => response,
                CallOutcome::Fatal(err) => {
                    let message = fatal_message(&err);
                    warn!("Ending run: {message}");
                    handler.on_event(&LifecycleEvent::turn_failed(message));
                    self.ctx.mark_complete();
                    return summary(session, iterations, false, final_message, messages);
                }
                CallOutcome::Exhausted(err) => {
                    handler.on_event(&LifecycleEvent::turn_failed(err.to_string()));
                    continue;
                }
            };

            snapshot = messages.clone();
            session.record_call(response.cost, response.usage);
            info!(
                "Call cost ${:.4}, total ${:.4} of ${:.2}",
                response.cost, session.cost, self.config.cost_limit
            );
            let LlmResponse {
                text, tool_calls, ..
            } = response;

            if !text.is_empty() {
                final_message = Some(text.clone());
                handler.on_event(&LifecycleEvent::ItemCompleted {
                    item: Item::agent_message(session.next_item_id(), &text),
                });
            }

            if tool_calls.is_empty() {
                if session.cost >= self.config.cost_limit {
                    warn!("Cost limit reached (${:.4})", session.cost);
                    break;
                }
                let (next, step) = verification::advance(phase, &text);
                debug!("Verification phase {phase} -> {next}");
                phase = next;
                let request = match step {
                    VerificationStep::RequestVerification => {
                        prompts::verification_request(&instruction)
                    }
                    VerificationStep::RequestConfirmation => {
                        prompts::confirmation_request(&instruction, &text)
                    }
                    VerificationStep::Continue => prompts::CONTINUE_REQUEST.to_string(),
                    VerificationStep::Done => {
                        info!("Task confirmed complete");
                        finished = true;
                        break;
                    }
                };
                messages.push(Message::assistant_text(text));
                messages.push(Message::user(request));
                continue;
            }

            messages.push(Message::assistant_tool_calls(text, tool_calls.clone()));
            let batch = run_tool_calls(
                self.tools,
                self.ctx,
                &tool_calls,
                &self.config,
                session,
                handler,
                &mut consecutive_failures,
            )
            .await;
            messages.extend(batch.messages);

            if session.cost >= self.config.cost_limit {
                warn!("Cost limit reached (${:.4})", session.cost);
                break;
            }

            if let Some(images) = image_message(batch.images, self.config.max_images_per_turn) {
                messages.push(images);
                let ceiling = self
                    .config
                    .context
                    .images
                    .hard_ceiling
                    .saturating_sub(IMAGE_CEILING_MARGIN);
                if count_images(&messages) > ceiling {
                    messages = self.manager.evict_images(messages);
                }
            }
        }

        if !finished && iterations >= self.config.max_iterations {
            warn!("Iteration limit reached ({iterations})");
        }
        handler.on_event(&LifecycleEvent::TurnCompleted {
            usage: session.usage.into(),
        });
        self.ctx.mark_complete();
        info!(
            "Agent run completed: session={}, iterations={iterations}, finished={finished}, cost=${:.4}",
            session.session_id(),
            session.cost
        );
        summary(session, iterations, finished, final_message, messages)
    }

    /// System prompt, instruction, and a listing of the working directory.
    async fn initial_messages(&self, instruction: &str) -> Vec<Message> {
        let listing = self
            .ctx
            .run_shell_command("pwd && ls -la", DEFAULT_SHELL_TIMEOUT)
            .await;
        let listing = truncate_middle(&listing.output, self.config.max_output_tokens);
        vec![
            Message::system(prompts::system_prompt(self.ctx.current_working_directory())),
            Message::user(instruction),
            Message::user(prompts::initial_state_message(&listing)),
        ]
    }
}

fn summary(
    session: &SessionState,
    iterations: u32,
    finished: bool,
    final_message: Option<String>,
    transcript: Vec<Message>,
) -> RunSummary {
    RunSummary {
        session_id: session.session_id().to_string(),
        iterations,
        finished,
        usage: session.usage,
        cost: session.cost,
        final_message,
        transcript,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::context::LocalContext;
    use crate::agent::context::fake::StaticContext;
    use crate::agent::events::{CollectingHandler, ItemDetails};
    use crate::api::error::{ErrorCode, LlmError};
    use crate::api::retry::RetryConfig;
    use crate::api::transport::fake::ScriptedTransport;
    use crate::tools::ToolSet;
    use crate::{MessageRole, ToolCall};

    fn config() -> LoopConfig {
        LoopConfig::new("test/model").with_retry(RetryConfig::immediate())
    }

    fn calls(list: &[(&str, &str, &str)]) -> LlmResponse {
        LlmResponse::text("").with_tool_calls(
            list.iter()
                .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
                .collect(),
        )
    }

    async fn run(
        transport: &ScriptedTransport,
        tools: &ToolSet,
        ctx: &dyn AgentContext,
        config: LoopConfig,
        handler: &CollectingHandler,
    ) -> RunSummary {
        let mut session = SessionState::new();
        Harness::new(transport, tools, ctx, config)
            .with_event_handler(handler)
            .run(&mut session)
            .await
    }

    #[tokio::test]
    async fn verification_handshake_ends_run() {
        let transport = ScriptedTransport::new(vec![
            Ok(LlmResponse::text("All done.")),
            Ok(LlmResponse::text("Verified: output matches.")),
            Ok(LlmResponse::text("Confirmed.")),
        ]);
        let ctx = StaticContext::new("create hello.txt");
        let handler = CollectingHandler::new();
        let summary = run(&transport, &ToolSet::new(), &ctx, config(), &handler).await;

        assert!(summary.finished);
        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.final_message.as_deref(), Some("Confirmed."));
        assert!(ctx.is_complete());
        assert_eq!(ctx.commands.lock().unwrap().as_slice(), ["pwd && ls -la"]);
        assert_eq!(
            handler.kinds(),
            [
                "thread.started",
                "turn.started",
                "item.completed",
                "item.completed",
                "item.completed",
                "turn.completed"
            ]
        );

        let t = &summary.transcript;
        assert_eq!(t.len(), 7);
        assert_eq!(t[0].role, MessageRole::System);
        assert_eq!(t[1].text_content(), "create hello.txt");
        assert_eq!(t[2].text_content(), prompts::initial_state_message("/work\ntotal 0"));
        assert_eq!(t[4].text_content(), prompts::verification_request("create hello.txt"));
        assert_eq!(
            t[6].text_content(),
            prompts::confirmation_request("create hello.txt", "Verified: output matches.")
        );
    }

    #[tokio::test]
    async fn run_keeps_caller_session_id() {
        let transport = ScriptedTransport::new(vec![
            Ok(LlmResponse::text("done")),
            Ok(LlmResponse::text("checked")),
            Ok(LlmResponse::text("yes")),
        ]);
        let ctx = StaticContext::new("t");
        let handler = CollectingHandler::new();
        let mut session = SessionState::with_id("sess_fixed");
        let summary = Harness::new(&transport, &ToolSet::new(), &ctx, config())
            .with_event_handler(&handler)
            .run(&mut session)
            .await;

        assert_eq!(summary.session_id, "sess_fixed");
        assert_eq!(session.session_id(), "sess_fixed");
        assert_eq!(
            handler.events().first(),
            Some(&LifecycleEvent::ThreadStarted { thread_id: "sess_fixed".into() })
        );
    }

    #[tokio::test]
    async fn incomplete_confirmation_sends_agent_back() {
        let transport = ScriptedTransport::new(vec![
            Ok(LlmResponse::text("done")),
            Ok(LlmResponse::text("checked")),
            Ok(LlmResponse::text("Task incomplete: tests fail")),
        ]);
        let ctx = StaticContext::new("t");
        let handler = CollectingHandler::new();
        let summary = run(
            &transport,
            &ToolSet::new(),
            &ctx,
            config().with_max_iterations(4),
            &handler,
        )
        .await;

        assert!(!summary.finished);
        assert_eq!(summary.iterations, 4);
        let t = &summary.transcript;
        assert_eq!(t[8].text_content(), prompts::CONTINUE_REQUEST);
        assert_eq!(t[10].text_content(), prompts::verification_request("t"));
        assert_eq!(handler.kinds().last(), Some(&"turn.completed"));
        assert!(ctx.is_complete());
    }

    #[tokio::test]
    async fn cost_limit_error_is_fatal() {
        let transport = ScriptedTransport::new(vec![Err(LlmError::cost_limit(1.0, 1.0))]);
        let ctx = StaticContext::new("t");
        let handler = CollectingHandler::new();
        let summary = run(&transport, &ToolSet::new(), &ctx, config(), &handler).await;

        assert!(!summary.finished);
        assert_eq!(transport.call_count(), 1);
        assert!(ctx.is_complete());
        assert_eq!(handler.kinds(), ["thread.started", "turn.started", "turn.failed"]);
        let events = handler.events();
        let LifecycleEvent::TurnFailed { error } = &events[2] else { panic!() };
        assert!(error.message.starts_with("Cost limit exceeded"));
    }

    #[tokio::test]
    async fn authentication_error_is_fatal() {
        let transport = ScriptedTransport::new(vec![Err(LlmError::new(
            ErrorCode::AuthenticationError,
            "invalid api key",
        ))]);
        let ctx = StaticContext::new("t");
        let handler = CollectingHandler::new();
        let summary = run(&transport, &ToolSet::new(), &ctx, config(), &handler).await;

        assert_eq!(summary.iterations, 1);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(handler.kinds(), ["thread.started", "turn.started", "turn.failed"]);
        assert!(ctx.is_complete());
    }

    #[tokio::test]
    async fn exhausted_retries_fail_turn_and_continue() {
        let mut script: Vec<_> = (0..5)
            .map(|_| Err(LlmError::new(ErrorCode::ApiError, "upstream 502")))
            .collect();
        script.push(Ok(LlmResponse::text("done")));
        let transport = ScriptedTransport::new(script);
        let ctx = StaticContext::new("t");
        let handler = CollectingHandler::new();
        let summary = run(
            &transport,
            &ToolSet::new(),
            &ctx,
            config().with_max_iterations(2),
            &handler,
        )
        .await;

        assert_eq!(transport.call_count(), 6);
        assert_eq!(summary.iterations, 2);
        assert_eq!(
            handler.kinds(),
            ["thread.started", "turn.started", "turn.failed", "item.completed", "turn.completed"]
        );
    }

    #[tokio::test]
    async fn bad_request_rolls_back_to_last_accepted_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        let tools = ToolSet::new().with_builtin_tools();
        let transport = ScriptedTransport::new(vec![
            Ok(calls(&[("c1", "list_dir", "{}")])),
            Err(LlmError::new(ErrorCode::BadRequest, "400 invalid message")),
            Ok(LlmResponse::text("done")),
        ]);
        let handler = CollectingHandler::new();
        let summary = run(&transport, &tools, &ctx, config().with_max_iterations(2), &handler).await;

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0].messages.len(), 3);
        assert_eq!(recorded[1].messages.len(), 5);
        assert_eq!(recorded[2].messages.len(), 3);
        assert_eq!(summary.transcript.len(), 5);
        assert_eq!(summary.transcript[4].text_content(), prompts::verification_request("t"));
    }

    #[tokio::test]
    async fn tools_run_against_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "write a greeting");
        let tools = ToolSet::new().with_builtin_tools();
        let transport = ScriptedTransport::new(vec![
            Ok(calls(&[(
                "c1",
                "write_file",
                r#"{"file_path":"hello.txt","content":"hi there"}"#,
            )])),
            Ok(calls(&[("c2", "read_file", r#"{"file_path":"hello.txt"}"#)])),
        ]);
        let handler = CollectingHandler::new();
        let summary = run(&transport, &tools, &ctx, config(), &handler).await;

        assert!(summary.finished);
        assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi there");
        let read = summary
            .transcript
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c2"))
            .unwrap();
        assert!(read.text_content().contains("L1: hi there"));

        let events = handler.events();
        let started: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::ItemStarted { item } => Some(item.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(started.len(), 2);
        assert!(matches!(
            &started[1].details,
            ItemDetails::CommandExecution { command, .. } if command == r#"read_file({"file_path":"hello.txt"})"#
        ));
    }

    #[tokio::test]
    async fn invalid_arguments_get_guidance_and_followup() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        let tools = ToolSet::new().with_builtin_tools();
        let transport = ScriptedTransport::new(vec![Ok(calls(&[
            ("c1", "read_file", "{}"),
            ("c2", "list_dir", "{}"),
        ]))]);
        let handler = CollectingHandler::new();
        let summary = run(&transport, &tools, &ctx, config().with_max_iterations(1), &handler).await;

        let t = &summary.transcript;
        assert_eq!(t.len(), 7);
        assert_eq!(t[4].tool_call_id.as_deref(), Some("c1"));
        assert!(t[4].text_content().contains("[INVALID TOOL PARAMETERS] 'read_file'"));
        assert_eq!(t[5].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(t[6].role, MessageRole::User);
        assert_eq!(t[6].text_content(), prompts::invalid_params_followup("read_file"));

        let statuses: Vec<_> = handler
            .events()
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::ItemCompleted { item } => match item.details {
                    ItemDetails::CommandExecution { exit_code, .. } => exit_code,
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(statuses, [1, 0]);
    }

    #[tokio::test]
    async fn images_are_attached_after_tool_results() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shot.png"), [0x89, b'P', b'N', b'G']).unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        let tools = ToolSet::new().with_builtin_tools();
        let transport = ScriptedTransport::new(vec![Ok(calls(&[(
            "c1",
            "view_image",
            r#"{"path":"shot.png"}"#,
        )]))]);
        let handler = CollectingHandler::new();
        let summary = run(&transport, &tools, &ctx, config().with_max_iterations(1), &handler).await;

        let last = summary.transcript.last().unwrap();
        assert_eq!(last.role, MessageRole::User);
        assert_eq!(last.image_count(), 1);
        assert_eq!(last.text_content(), "Image from view_image:");
    }

    #[tokio::test]
    async fn accumulated_cost_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = LocalContext::new(dir.path(), "t");
        let tools = ToolSet::new().with_builtin_tools();
        let transport = ScriptedTransport::new(vec![Ok(calls(&[("c1", "list_dir", "{}")])
            .with_cost(0.6)
            .with_usage(TokenUsage { input: 100, output: 10, cached: 40 }))]);
        let handler = CollectingHandler::new();
        let summary = run(&transport, &tools, &ctx, config().with_cost_limit(0.5), &handler).await;

        assert_eq!(summary.iterations, 1);
        assert!(!summary.finished);
        assert_eq!(summary.usage.cached, 40);
        let events = handler.events();
        let Some(LifecycleEvent::TurnCompleted { usage }) = events.last() else { panic!() };
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cached_input_tokens, 40);
        assert_eq!(usage.output_tokens, 10);
    }

    #[tokio::test]
    async fn iteration_limit_still_completes_turn() {
        let transport = ScriptedTransport::new(vec![]);
        let ctx = StaticContext::new("t");
        let handler = CollectingHandler::new();
        let summary = run(
            &transport,
            &ToolSet::new(),
            &ctx,
            config().with_max_iterations(1),
            &handler,
        )
        .await;
        assert!(!summary.finished);
        assert_eq!(summary.iterations, 1);
        assert_eq!(handler.kinds().last(), Some(&"turn.completed"));
        assert!(ctx.is_complete());
    }
}
