//! `update_plan`: the model's running checklist for the task.

use std::fmt;
use std::sync::Mutex;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::agent::context::AgentContext;
use crate::tools::core::{Tool, ToolFuture, ToolOutcome, parse_tool_args};
use crate::{ToolDef, json_schema_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "[ ]"),
            StepStatus::InProgress => write!(f, "[>]"),
            StepStatus::Completed => write!(f, "[x]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// Short description of the step (5-7 words).
    pub description: String,
    /// Current status of the step.
    #[serde(default)]
    pub status: StepStatus,
}

/// Typed arguments for `update_plan`.
#[derive(Deserialize, JsonSchema)]
pub struct UpdatePlanArgs {
    /// The whole plan, replacing the previous one.
    pub steps: Vec<PlanStep>,
    /// Why the plan changed, if it did.
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Replaces the stored plan on every call and echoes it back.
#[derive(Default)]
pub struct UpdatePlan {
    steps: Mutex<Vec<PlanStep>>,
}

impl UpdatePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent plan.
    pub fn plan(&self) -> Vec<PlanStep> {
        self.steps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn render(steps: &[PlanStep], explanation: Option<&str>) -> String {
        let mut out = String::from("Plan updated:");
        for (i, step) in steps.iter().enumerate() {
            out.push_str(&format!("\n  {} {}. {}", step.status, i + 1, step.description));
        }
        if let Some(why) = explanation.filter(|w| !w.is_empty()) {
            out.push_str(&format!("\n\nReason: {why}"));
        }
        out
    }
}

impl Tool for UpdatePlan {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "update_plan",
            "Record your plan for the task and mark steps as you go. Send the \
             full list every time; it replaces the previous plan. Keep each \
             step to 5-7 words.",
            json_schema_for::<UpdatePlanArgs>(),
        )
    }

    fn execute<'a>(&'a self, _ctx: &'a dyn AgentContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: UpdatePlanArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(_) => {
                    return ToolOutcome::invalid(
                        "Missing or malformed parameter 'steps'. Usage: update_plan(steps: \
                         [{description: str, status: 'pending'|'in_progress'|'completed'}], \
                         explanation?: str)",
                    );
                }
            };
            let text = Self::render(&args.steps, args.explanation.as_deref());
            *self.steps.lock().unwrap_or_else(|e| e.into_inner()) = args.steps;
            ToolOutcome::ok(text)
        })
    }
}
