//! ReAct loop implementation.
//!
//! One run of the research agent:
//! 1. Ask the model for its next turn, offering every tool definition
//! 2. Append the model turn to the conversation
//! 3. Dispatch the turn's invocations concurrently and append one tool turn per result
//! 4. Evaluate the stop policy, repeat while it says continue
//!
//! Every run owns a fresh [`BindingSession`], torn down when the run ends.

use std::sync::Arc;

use uuid::Uuid;

use research_agent_core::config::AgentConfig;
use research_agent_core::{
    unix_timestamp, ConversationRecord, ConversationStore, ConversationTurn, Error, FinishReason,
    LlmClient, LlmResponse, Result, RunStatus, ToolDefinition,
};

use crate::conversation::{ConversationState, StopDecision, StopPolicy, StopReason, TerminateHandle};
use crate::dispatcher::ToolCallDispatcher;
use crate::parser::{ActionParser, ReActAction};
use crate::session::BindingSession;

/// Nudge appended after a turn that neither acted nor answered.
const ACTION_NUDGE: &str =
    "Please take an action using a tool, or provide your FINAL ANSWER if the task is complete.";

/// Result of one agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub run_id: String,
    pub conversation: ConversationState,
    pub stop_reason: StopReason,
    pub final_answer: Option<String>,
    /// Number of model turns in the conversation.
    pub rounds: usize,
}

/// The research agent.
pub struct ResearchAgent {
    pub(crate) config: AgentConfig,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) dispatcher: ToolCallDispatcher,
    pub(crate) store: Option<Arc<dyn ConversationStore>>,
    pub(crate) terminate: TerminateHandle,
}

impl ResearchAgent {
    /// Create a new builder for ResearchAgent.
    pub fn builder() -> crate::builder::ResearchAgentBuilder {
        crate::builder::ResearchAgentBuilder::new()
    }

    /// Handle that forces the current and later runs to halt.
    pub fn terminate_handle(&self) -> TerminateHandle {
        self.terminate.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the agent on `goal` until the stop policy halts it.
    pub async fn run(&self, goal: &str) -> Result<AgentRun> {
        let tools = self.dispatcher.definitions().await?;
        let run_id = Uuid::new_v4().to_string();

        let mut conversation = ConversationState::new();
        conversation.append(ConversationTurn::system(self.build_system_prompt(goal, &tools)));
        conversation.append(ConversationTurn::user(goal));

        tracing::info!(run_id = %run_id, tools = tools.len(), "Starting research run");
        self.drive(run_id, goal, conversation, &tools).await
    }

    /// Continue a persisted run that has not completed.
    ///
    /// Code bindings are not persisted, so the resumed run starts with an
    /// empty binding session.
    pub async fn resume(&self, run_id: &str) -> Result<AgentRun> {
        let store = self.store.as_ref().ok_or_else(|| {
            Error::controller("Run persistence not configured (store is None)")
        })?;
        let record = store
            .load(run_id)
            .await?
            .ok_or_else(|| Error::controller(format!("Run {} not found", run_id)))?;

        tracing::info!(run_id = %run_id, status = ?record.status, turns = record.turns.len(), "Resuming run");
        match record.status {
            RunStatus::Completed => Err(Error::controller(format!("Run {} already completed", run_id))),
            RunStatus::Failed => Err(Error::controller("Cannot resume failed run")),
            RunStatus::Running => {
                let tools = self.dispatcher.definitions().await?;
                let conversation = ConversationState::from_turns(record.turns);
                self.drive(record.run_id, &record.goal, conversation, &tools).await
            }
        }
    }

    async fn drive(
        &self,
        run_id: String,
        goal: &str,
        mut conversation: ConversationState,
        tools: &[ToolDefinition],
    ) -> Result<AgentRun> {
        let policy = StopPolicy::from_config(&self.config, self.terminate.clone());
        let mut session = BindingSession::new();

        let outcome = self
            .run_loop(&run_id, goal, &mut conversation, &mut session, &policy, tools)
            .await;
        session.teardown();

        let status = if outcome.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.persist(&run_id, goal, status, &conversation).await;

        let (stop_reason, final_answer) = outcome?;
        let rounds = conversation.model_turns();
        tracing::info!(
            run_id = %run_id,
            rounds,
            tokens = conversation.total_tokens(),
            stop_reason = %stop_reason,
            answered = final_answer.is_some(),
            "Research run finished"
        );

        Ok(AgentRun {
            run_id,
            conversation,
            stop_reason,
            final_answer,
            rounds,
        })
    }

    async fn run_loop(
        &self,
        run_id: &str,
        goal: &str,
        conversation: &mut ConversationState,
        session: &mut BindingSession,
        policy: &StopPolicy,
        tools: &[ToolDefinition],
    ) -> Result<(StopReason, Option<String>)> {
        let mut final_answer = None;

        loop {
            if self.terminate.is_terminated() {
                tracing::warn!(run_id = %run_id, "Run terminated before the next model call");
                return Ok((StopReason::ForceTerminated, final_answer));
            }

            let round = conversation.model_turns() + 1;
            tracing::info!(
                run_id = %run_id,
                round,
                history_len = conversation.len(),
                "Executing ReAct iteration"
            );

            let response = self.llm.chat(&conversation.to_messages(), tools).await?;
            let tokens = turn_tokens(&response);
            tracing::debug!(
                response_len = response.content.len(),
                tokens,
                finish_reason = ?response.finish_reason,
                "LLM response received"
            );

            let mut wants_nudge = false;
            match ActionParser::parse(&response) {
                ReActAction::ToolCalls(invocations) => {
                    conversation.append(
                        ConversationTurn::assistant(response.content.clone())
                            .with_tokens(tokens)
                            .with_finish_reason(FinishReason::ToolCalls)
                            .with_invocations(invocations.clone()),
                    );

                    let results = self.dispatcher.dispatch(&invocations, session).await;
                    for (invocation, result) in invocations.iter().zip(results) {
                        conversation.append(ConversationTurn::tool(
                            result.invocation_id,
                            invocation.name.clone(),
                            result.text,
                        ));
                    }
                }
                ReActAction::FinalAnswer(answer) => {
                    tracing::info!(answer_len = answer.len(), "Task completed with final answer");
                    conversation.append(
                        ConversationTurn::assistant(response.content.clone())
                            .with_tokens(tokens)
                            .with_finish_reason(FinishReason::Stop),
                    );
                    final_answer = Some(answer);
                }
                ReActAction::Think(thought) => {
                    tracing::debug!(thought_len = thought.len(), "Agent thinking");
                    let mut turn = ConversationTurn::assistant(response.content.clone()).with_tokens(tokens);
                    if let Some(reason) = response.finish_reason.as_deref() {
                        turn = turn.with_finish_reason(FinishReason::parse(reason));
                    }
                    conversation.append(turn);
                    wants_nudge = true;
                }
            }

            if self.config.persist {
                self.persist(run_id, goal, RunStatus::Running, conversation).await;
            }

            match policy.evaluate(conversation) {
                StopDecision::Halt(reason) => {
                    if final_answer.is_none() && reason == StopReason::Finished(FinishReason::Stop) {
                        final_answer = conversation
                            .last_model_turn()
                            .map(|t| t.content.trim().to_string())
                            .filter(|c| !c.is_empty());
                    }
                    tracing::info!(run_id = %run_id, reason = %reason, "Stop policy halted the run");
                    return Ok((reason, final_answer));
                }
                StopDecision::Continue if wants_nudge => {
                    conversation.append(ConversationTurn::user(ACTION_NUDGE));
                }
                StopDecision::Continue => {}
            }
        }
    }

    async fn persist(&self, run_id: &str, goal: &str, status: RunStatus, conversation: &ConversationState) {
        if !self.config.persist {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let record = ConversationRecord {
            run_id: run_id.to_string(),
            goal: goal.to_string(),
            status,
            turns: conversation.turns().to_vec(),
            updated_at: unix_timestamp(),
        };
        if let Err(e) = store.save(&record).await {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to save run state");
        }
    }

    /// Build the system prompt for the agent.
    fn build_system_prompt(&self, goal: &str, tools: &[ToolDefinition]) -> String {
        if let Some(prompt) = &self.config.system_prompt {
            return prompt.clone();
        }

        let tools_description = if tools.is_empty() {
            "(no tools available)".to_string()
        } else {
            tools
                .iter()
                .map(|t| format!("- {}: {}", t.name, t.description))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"You are a research assistant that uses the ReAct (Reasoning + Acting) pattern.

GOAL: {goal}

AVAILABLE TOOLS:
{tools_description}

INSTRUCTIONS:
1. Think step by step about what needs to be done
2. Call tools when needed; independent calls may be issued together in one turn
3. Variables defined by execute_code stay available to later execute_code calls
4. After receiving tool results, continue reasoning
5. When done, provide your FINAL ANSWER

If native tool calling is unavailable, use this text format for a tool call:
ACTION: <tool_name>
ARGS: <json arguments>

For the final answer (when the task is complete):
FINAL ANSWER: <your complete answer>

Be concise and focused on the goal."#
        )
    }
}

fn turn_tokens(response: &LlmResponse) -> u64 {
    let usage = &response.usage;
    if usage.total_tokens > 0 {
        usage.total_tokens
    } else {
        usage.prompt_tokens + usage.completion_tokens
    }
}
