//! Parser module for model turns.
//!
//! Normalizes whatever the model returned in one turn (legacy single
//! `function_call`, a batch of `tool_calls`, or the ACTION/ARGS text format)
//! into an ordered list of [`ToolInvocation`]s, and recognizes final answers.

use uuid::Uuid;

use research_agent_core::{InvocationStyle, LlmResponse, ToolCallRequest, ToolInvocation};

/// Marker that introduces a final answer in a model turn.
pub const FINAL_ANSWER_MARKER: &str = "FINAL ANSWER:";

/// What the model asked for in one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ReActAction {
    /// Run these invocations, in this order.
    ToolCalls(Vec<ToolInvocation>),
    /// Final answer - task complete.
    FinalAnswer(String),
    /// Continue thinking (no action yet).
    Think(String),
}

/// Parser for model turns.
pub struct ActionParser;

impl ActionParser {
    /// Classify a model turn.
    ///
    /// Native tool calls win over text. Without them, a final answer wins over an
    /// ACTION/ARGS block.
    pub fn parse(response: &LlmResponse) -> ReActAction {
        let invocations = normalize_invocations(response);
        if !invocations.is_empty() {
            return ReActAction::ToolCalls(invocations);
        }
        if let Some(answer) = extract_final_answer(&response.content) {
            return ReActAction::FinalAnswer(answer);
        }
        if let Some(call) = parse_text_action(&response.content) {
            return ReActAction::ToolCalls(vec![into_invocation(call, InvocationStyle::LegacySingle)]);
        }
        ReActAction::Think(response.content.trim().to_string())
    }
}

/// Merge the legacy call and the batch into one list: legacy first, then the
/// batch in order. Missing ids are synthesized. Arguments are kept verbatim,
/// malformed or not.
pub fn normalize_invocations(response: &LlmResponse) -> Vec<ToolInvocation> {
    let legacy = response
        .function_call
        .iter()
        .cloned()
        .map(|call| into_invocation(call, InvocationStyle::LegacySingle));
    let batch = response
        .tool_calls
        .iter()
        .cloned()
        .map(|call| into_invocation(call, InvocationStyle::BatchMulti));
    legacy.chain(batch).collect()
}

/// Text after the final-answer marker, if the turn contains one.
pub fn extract_final_answer(content: &str) -> Option<String> {
    content
        .find(FINAL_ANSWER_MARKER)
        .map(|pos| content[pos + FINAL_ANSWER_MARKER.len()..].trim().to_string())
}

fn into_invocation(call: ToolCallRequest, style: InvocationStyle) -> ToolInvocation {
    let id = call
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
    ToolInvocation {
        id,
        name: call.name.trim().to_string(),
        arguments_json: call.arguments,
        style,
    }
}

/// Parse the ACTION/ARGS text format. A missing ARGS line means no arguments.
fn parse_text_action(content: &str) -> Option<ToolCallRequest> {
    let mut tool_name = None;
    let mut args_json = None;

    for line in content.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("ACTION:") {
            tool_name = Some(name.trim().to_string());
        } else if let Some(args) = line.strip_prefix("ARGS:") {
            args_json = Some(args.trim().to_string());
        }
    }

    let name = tool_name.filter(|n| !n.is_empty())?;
    Some(ToolCallRequest::new(name, args_json.unwrap_or_else(|| "{}".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_answer() {
        let action = ActionParser::parse(&LlmResponse::text("FINAL ANSWER: The result is 42."));
        assert_eq!(action, ReActAction::FinalAnswer("The result is 42.".into()));
    }

    #[test]
    fn test_final_answer_after_reasoning() {
        let action = ActionParser::parse(&LlmResponse::text(
            "THOUGHT: the paper is from 2017.\nFINAL ANSWER: 2017",
        ));
        assert_eq!(action, ReActAction::FinalAnswer("2017".into()));
    }

    #[test]
    fn test_parse_text_tool_call() {
        let action = ActionParser::parse(&LlmResponse::text(
            "THOUGHT: I need to search.\nACTION: search\nARGS: {\"query\": \"rust\"}",
        ));
        match action {
            ReActAction::ToolCalls(invocations) => {
                assert_eq!(invocations.len(), 1);
                let inv = &invocations[0];
                assert_eq!(inv.name, "search");
                assert_eq!(inv.style, InvocationStyle::LegacySingle);
                assert_eq!(inv.arguments().unwrap()["query"], "rust");
                assert!(inv.id.starts_with("call_"));
            }
            other => panic!("Expected ToolCalls, got {:?}", other),
        }
    }

    #[test]
    fn test_text_action_without_args() {
        match ActionParser::parse(&LlmResponse::text("ACTION: current_time")) {
            ReActAction::ToolCalls(invocations) => assert_eq!(invocations[0].arguments_json, "{}"),
            other => panic!("Expected ToolCalls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_think() {
        let action = ActionParser::parse(&LlmResponse::text("I'm still thinking about this problem..."));
        assert!(matches!(action, ReActAction::Think(t) if t.contains("thinking")));
    }

    #[test]
    fn test_legacy_call_precedes_batch() {
        let mut response = LlmResponse::with_tool_calls(vec![
            ToolCallRequest::new("b", "{}").with_id("id_b"),
            ToolCallRequest::new("c", "{}").with_id("id_c"),
        ]);
        response.function_call = Some(ToolCallRequest::new("a", "{}").with_id("id_a"));

        let invocations = normalize_invocations(&response);
        let ids: Vec<_> = invocations.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["id_a", "id_b", "id_c"]);
        assert_eq!(invocations[0].style, InvocationStyle::LegacySingle);
        assert_eq!(invocations[1].style, InvocationStyle::BatchMulti);
    }

    #[test]
    fn test_missing_ids_are_unique() {
        let response = LlmResponse::with_tool_calls(vec![
            ToolCallRequest::new("x", "{}"),
            ToolCallRequest::new("x", "{}").with_id(" "),
        ]);
        let invocations = normalize_invocations(&response);
        assert_ne!(invocations[0].id, invocations[1].id);
        assert!(invocations.iter().all(|i| i.id.starts_with("call_")));
    }

    #[test]
    fn test_malformed_arguments_are_kept() {
        let response = LlmResponse::with_tool_calls(vec![ToolCallRequest::new("x", "{not json")]);
        let invocations = normalize_invocations(&response);
        assert_eq!(invocations[0].arguments_json, "{not json");
        assert!(invocations[0].arguments().is_err());
    }

    #[test]
    fn test_native_calls_win_over_text() {
        let mut response = LlmResponse::with_tool_calls(vec![ToolCallRequest::new("echo", "{}")]);
        response.content = "FINAL ANSWER: too early".into();
        assert!(matches!(ActionParser::parse(&response), ReActAction::ToolCalls(_)));
    }
}
