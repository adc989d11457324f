//! Conversation log and stop policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use research_agent_core::config::AgentConfig;
use research_agent_core::{ChatMessage, ConversationTurn, FinishReason, Role, ToolCallRequest};

// =============================================================================
// Conversation State
// =============================================================================

/// Append-only, ordered turn log.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted turns.
    pub fn from_turns(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }

    /// Append a turn and return its index. This is the only mutation.
    pub fn append(&mut self, turn: ConversationTurn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Most recent model turn.
    pub fn last_model_turn(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }

    /// Number of model turns so far.
    pub fn model_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::Assistant).count()
    }

    /// Sum of all turn token counts.
    pub fn total_tokens(&self) -> u64 {
        self.turns.iter().map(|t| t.metadata.tokens).sum()
    }

    /// Render the log as chat messages for the model.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|turn| {
                let mut msg = ChatMessage::new(turn.role.as_str(), turn.content.clone());
                msg.tool_calls = turn
                    .metadata
                    .invocations
                    .iter()
                    .map(|inv| {
                        ToolCallRequest::new(inv.name.clone(), inv.arguments_json.clone())
                            .with_id(inv.id.clone())
                    })
                    .collect();
                msg.tool_call_id = turn.metadata.tool_call_id.clone();
                msg
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a ConversationState {
    type Item = &'a ConversationTurn;
    type IntoIter = std::slice::Iter<'a, ConversationTurn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

// =============================================================================
// Termination
// =============================================================================

/// Cloneable switch that forces the agent loop to halt at its next check.
#[derive(Debug, Clone, Default)]
pub struct TerminateHandle {
    flag: Arc<AtomicBool>,
}

impl TerminateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the handle can serve another run.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Stop Policy
// =============================================================================

/// Why the loop halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The model turn carried an explicit finish signal.
    Finished(FinishReason),
    /// The terminate handle was triggered.
    ForceTerminated,
    /// The model-turn limit was reached.
    MaxRounds(usize),
    /// The cumulative token budget was used up.
    TokenBudget { used: u64, limit: u64 },
    /// A single model turn used too many tokens.
    TurnTokenLimit { used: u64, limit: u64 },
    /// A configured stop phrase appeared.
    StopWord(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished(reason) => write!(f, "model finished ({:?})", reason),
            Self::ForceTerminated => write!(f, "terminated on request"),
            Self::MaxRounds(n) => write!(f, "reached the limit of {} rounds", n),
            Self::TokenBudget { used, limit } => {
                write!(f, "token budget exhausted ({} of {})", used, limit)
            }
            Self::TurnTokenLimit { used, limit } => {
                write!(f, "turn used {} tokens, limit is {}", used, limit)
            }
            Self::StopWord(word) => write!(f, "stop word '{}' found", word),
        }
    }
}

/// Result of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDecision {
    Continue,
    Halt(StopReason),
}

impl StopDecision {
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

/// Decides after every model turn whether the loop goes on.
#[derive(Debug, Clone, Default)]
pub struct StopPolicy {
    pub max_rounds: Option<usize>,
    pub max_tokens_all_turns: Option<u64>,
    pub max_tokens_per_turn: Option<u64>,
    pub stop_words: Vec<String>,
    pub terminate: TerminateHandle,
}

impl StopPolicy {
    /// Policy from the agent settings, wired to `terminate`.
    pub fn from_config(config: &AgentConfig, terminate: TerminateHandle) -> Self {
        Self {
            max_rounds: config.max_rounds,
            max_tokens_all_turns: config.max_tokens_all_turns,
            max_tokens_per_turn: config.max_tokens_per_turn,
            stop_words: config
                .stop_words
                .iter()
                .filter(|w| !w.is_empty())
                .cloned()
                .collect(),
            terminate,
        }
    }

    /// Evaluate the log. The first check that fires decides.
    pub fn evaluate(&self, state: &ConversationState) -> StopDecision {
        let last_model = state.last_model_turn();

        if let Some(reason) = last_model.and_then(|t| t.metadata.finish_reason.as_ref()) {
            if reason.is_terminal() {
                return StopDecision::Halt(StopReason::Finished(reason.clone()));
            }
        }

        if self.terminate.is_terminated() {
            return StopDecision::Halt(StopReason::ForceTerminated);
        }

        if let Some(max) = self.max_rounds {
            if state.model_turns() >= max {
                return StopDecision::Halt(StopReason::MaxRounds(max));
            }
        }

        if let Some(limit) = self.max_tokens_all_turns {
            let used = state.total_tokens();
            if used >= limit {
                return StopDecision::Halt(StopReason::TokenBudget { used, limit });
            }
        }

        if let (Some(limit), Some(turn)) = (self.max_tokens_per_turn, last_model) {
            if state.len() >= 2 && turn.metadata.tokens >= limit {
                return StopDecision::Halt(StopReason::TurnTokenLimit {
                    used: turn.metadata.tokens,
                    limit,
                });
            }
        }

        // Only text the run produced counts; the prompt, goal and nudges are ours.
        let produced = || {
            state
                .iter()
                .filter(|t| matches!(t.role, Role::Assistant | Role::Tool))
        };
        for word in &self.stop_words {
            if produced().any(|t| t.content.contains(word.as_str())) {
                return StopDecision::Halt(StopReason::StopWord(word.clone()));
            }
        }

        StopDecision::Continue
    }
}
