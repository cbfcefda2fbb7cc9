use anyhow::Result;
use serde_json::Value;

use crate::model::{ChatMessage, ChatRequest, LanguageModel};
use crate::tools::{Toolbox, tool_specs};

const RESEARCH_TEMPERATURE: f64 = 0.7;

/// Objective schema for one loop invocation. Two instantiations share the
/// same control logic: a broad topic-to-date sweep and a narrow sub-event
/// follow-up.
#[derive(Debug, Clone)]
pub enum Objective {
    Broad {
        topic: String,
        time_until: String,
    },
    Event {
        topic: String,
        subtopic: String,
        date: String,
    },
}

impl Objective {
    pub fn system_prompt(&self) -> String {
        let goal = match self {
            Objective::Broad { .. } => {
                "Produce a chronological timeline of the key events for the given topic, \
                 from its beginning up to the given date."
            }
            Objective::Event { .. } => {
                "Produce a detailed chronological timeline of the specific sub-event, \
                 centered around the given date, in the context of the overall topic."
            }
        };
        format!(
            "You are a research assistant building evidence-based timelines. {goal} \
             Use the available tools to gather evidence; tool errors are ordinary \
             results you can react to by retrying differently or choosing another tool. \
             When you have enough evidence, reply with the finished timeline as plain \
             text and make no further tool calls."
        )
    }

    pub fn user_prompt(&self) -> String {
        match self {
            Objective::Broad { topic, time_until } => {
                format!("## topic_pertaining_to\n{topic}\n\n## time_until\n{time_until}")
            }
            Objective::Event {
                topic,
                subtopic,
                date,
            } => format!(
                "## topic_pertaining_to\n{topic}\n\n## subtopic_pertaining_to\n{subtopic}\n\n## date\n{date}"
            ),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Objective::Broad { .. } => "broad",
            Objective::Event { .. } => "event",
        }
    }
}

/// One (tool, arguments, result) entry in the loop's trace.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub tool: String,
    pub arguments: Value,
    pub result: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// The model produced a final answer within the iteration budget.
    Answered,
    /// The cap was reached first; the timeline is a best-effort rendering.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct LoopResult {
    pub timeline: String,
    pub status: LoopStatus,
    pub rounds: usize,
}

/// Bounded single-threaded tool-calling agent. The iteration cap is a hard
/// ceiling and the system's only timeout mechanism: the loop always returns,
/// either with the model's answer or a degraded best-effort result.
pub struct ResearchLoop<'a> {
    model: &'a dyn LanguageModel,
    model_id: String,
    toolbox: &'a Toolbox,
    max_iters: usize,
}

impl<'a> ResearchLoop<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        model_id: impl Into<String>,
        toolbox: &'a Toolbox,
        max_iters: usize,
    ) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            toolbox,
            max_iters: max_iters.max(1),
        }
    }

    pub async fn run(&self, objective: &Objective) -> Result<LoopResult> {
        let mut messages = vec![
            ChatMessage::system(objective.system_prompt()),
            ChatMessage::user(objective.user_prompt()),
        ];
        let mut trace: Vec<TraceStep> = Vec::new();

        for round in 0..self.max_iters {
            let response = self
                .model
                .complete(ChatRequest {
                    model: self.model_id.clone(),
                    messages: messages.clone(),
                    temperature: RESEARCH_TEMPERATURE,
                    tools: tool_specs(),
                })
                .await?;

            if let Some(call) = response.tool_call {
                let result = self.toolbox.dispatch(&call.name, &call.arguments).await;
                tracing::debug!(
                    objective = objective.label(),
                    round,
                    tool = %call.name,
                    result_chars = result.len(),
                    "tool call completed"
                );
                trace.push(TraceStep {
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: result.clone(),
                });

                let call_id = if call.id.is_empty() {
                    format!("call-{round}")
                } else {
                    call.id.clone()
                };
                messages.push(ChatMessage::Assistant {
                    content: response.text,
                    tool_call: Some(call),
                });
                messages.push(ChatMessage::Tool {
                    call_id,
                    content: result,
                });
                continue;
            }

            if let Some(text) = response.text.filter(|text| !text.trim().is_empty()) {
                return Ok(LoopResult {
                    timeline: text,
                    status: LoopStatus::Answered,
                    rounds: round + 1,
                });
            }

            messages.push(ChatMessage::user(
                "Reply with the finished timeline, or call a tool to gather more evidence.",
            ));
        }

        tracing::warn!(
            objective = objective.label(),
            max_iters = self.max_iters,
            "iteration cap reached without a final answer"
        );
        Ok(self.best_effort(messages, &trace).await)
    }

    /// One last no-tools completion over the accumulated trace; if even that
    /// fails, fall back to a rendering of the partial trace.
    async fn best_effort(&self, mut messages: Vec<ChatMessage>, trace: &[TraceStep]) -> LoopResult {
        messages.push(ChatMessage::user(
            "The research budget is exhausted. Using only the evidence gathered above, \
             write the best timeline you can now, as plain text.",
        ));
        let timeline = match self
            .model
            .complete(ChatRequest {
                model: self.model_id.clone(),
                messages,
                temperature: RESEARCH_TEMPERATURE,
                tools: Vec::new(),
            })
            .await
        {
            Ok(response) => response
                .text
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| render_trace(trace)),
            Err(err) => {
                tracing::warn!(error = %err, "best-effort completion failed, rendering trace");
                render_trace(trace)
            }
        };

        LoopResult {
            timeline,
            status: LoopStatus::Exhausted,
            rounds: self.max_iters,
        }
    }
}

fn render_trace(trace: &[TraceStep]) -> String {
    if trace.is_empty() {
        return "No evidence was gathered before the research budget ran out.".to_string();
    }

    trace
        .iter()
        .map(|step| format!("## {} {}\n{}", step.tool, step.arguments, step.result))
        .collect::<Vec<String>>()
        .join("\n\n")
}
