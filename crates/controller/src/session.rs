//! Per-run binding session.
//!
//! Owns the binding snapshot shared by sequential code runs of one agent run.
//! Every code invocation gets its own deep copy; the results of a turn are
//! committed back only once the whole turn has finished.

use uuid::Uuid;

use research_agent_sandbox::{BindingSnapshot, ExecutionOutcome};

/// Name of the tool that clears the session bindings.
pub const RESET_SESSION_TOOL: &str = "reset_session";

/// A snapshot handed out to one invocation.
#[derive(Debug, Clone)]
pub struct IssuedSnapshot {
    pub invocation_id: String,
    pub binding_names: Vec<String>,
}

/// Binding state of one agent run.
#[derive(Debug)]
pub struct BindingSession {
    id: String,
    current: BindingSnapshot,
    issued: Vec<IssuedSnapshot>,
    torn_down: bool,
}

impl Default for BindingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingSession {
    pub fn new() -> Self {
        let id = Uuid::new_v4().to_string();
        tracing::debug!(session_id = %id, "Binding session created");
        Self {
            id,
            current: BindingSnapshot::new(),
            issued: Vec::new(),
            torn_down: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current bindings.
    pub fn current(&self) -> &BindingSnapshot {
        &self.current
    }

    /// Hand out an independent copy of the current bindings to `invocation_id`.
    pub fn snapshot(&mut self, invocation_id: &str) -> BindingSnapshot {
        if self.torn_down {
            tracing::warn!(session_id = %self.id, "Snapshot requested after teardown");
            return BindingSnapshot::new();
        }
        let copy = self.current.deep_clone();
        self.issued.push(IssuedSnapshot {
            invocation_id: invocation_id.to_string(),
            binding_names: copy.names().into_iter().map(String::from).collect(),
        });
        copy
    }

    /// Commit the harvested bindings of one turn, given in request order as
    /// `(invocation_id, outcome)` pairs.
    ///
    /// Only successful runs contribute; on a name clash the later request wins.
    /// A name that was in an invocation's seed but is missing from its harvest
    /// (rebound to a value the filter drops) is removed from the session.
    /// Returns how many outcomes were committed.
    pub fn commit_turn<'a, I>(&mut self, outcomes: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a ExecutionOutcome)>,
    {
        if self.torn_down {
            return 0;
        }
        let mut merged = 0;
        for (invocation_id, outcome) in outcomes {
            let Some(bindings) = outcome.bindings_after() else {
                continue;
            };
            if let Some(issued) = self
                .issued
                .iter()
                .rev()
                .find(|issued| issued.invocation_id == invocation_id)
            {
                for name in &issued.binding_names {
                    if bindings.get(name).is_none() && self.current.remove(name).is_some() {
                        tracing::debug!(session_id = %self.id, binding = %name, "Binding dropped by harvest");
                    }
                }
            }
            self.current.merge(bindings);
            merged += 1;
        }
        if merged > 0 {
            tracing::debug!(
                session_id = %self.id,
                merged,
                bindings = self.current.len(),
                "Turn bindings committed"
            );
        }
        merged
    }

    /// Drop all bindings; the issued ledger is kept.
    pub fn reset(&mut self) {
        tracing::info!(session_id = %self.id, dropped = self.current.len(), "Binding session reset");
        self.current = BindingSnapshot::new();
    }

    /// Release everything held by the session. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        tracing::debug!(session_id = %self.id, issued = self.issued.len(), "Binding session torn down");
        self.current = BindingSnapshot::new();
        self.issued.clear();
        self.torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Number of snapshots handed out since creation.
    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    pub fn issued(&self) -> &[IssuedSnapshot] {
        &self.issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Dynamic;

    fn success(pairs: &[(&str, i64)]) -> ExecutionOutcome {
        let (bindings_after, _) = BindingSnapshot::filter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Dynamic::from(*v))),
        );
        ExecutionOutcome::Success {
            stdout: String::new(),
            bindings_after,
        }
    }

    /// Pair each outcome with an invocation id that was never issued a seed.
    fn turn(outcomes: &[ExecutionOutcome]) -> Vec<(&str, &ExecutionOutcome)> {
        outcomes.iter().map(|outcome| ("call_unseeded", outcome)).collect()
    }

    fn value(session: &BindingSession, name: &str) -> Option<i64> {
        session.current().get(name).and_then(|v| v.as_int().ok())
    }

    #[test]
    fn test_later_request_wins_and_failures_are_ignored() {
        let mut session = BindingSession::new();
        let failure = ExecutionOutcome::Failure {
            stdout: String::new(),
            exception_type: "RuntimeError".into(),
            exception_value: "x".into(),
            trace_text: String::new(),
        };
        let timeout = ExecutionOutcome::Timeout {
            stdout: String::new(),
            elapsed_seconds: 1.0,
        };

        let outcomes = [
            success(&[("x", 1), ("y", 1)]),
            failure,
            success(&[("x", 2)]),
            timeout,
        ];
        let merged = session.commit_turn(turn(&outcomes));

        assert_eq!(merged, 2);
        assert_eq!(value(&session, "x"), Some(2));
        assert_eq!(value(&session, "y"), Some(1));
    }

    #[test]
    fn test_snapshots_are_independent_and_recorded() {
        let mut session = BindingSession::new();
        session.commit_turn(turn(&[success(&[("x", 1)])]));

        let a = session.snapshot("call_a");
        session.commit_turn(turn(&[success(&[("x", 5)])]));
        let b = session.snapshot("call_b");

        assert_eq!(a.get("x").and_then(|v| v.as_int().ok()), Some(1));
        assert_eq!(b.get("x").and_then(|v| v.as_int().ok()), Some(5));
        assert_eq!(session.issued_count(), 2);
        assert_eq!(session.issued()[0].invocation_id, "call_a");
        assert_eq!(session.issued()[0].binding_names, vec!["x".to_string()]);
    }

    #[test]
    fn test_reset_clears_bindings() {
        let mut session = BindingSession::new();
        session.commit_turn(turn(&[success(&[("x", 1)])]));
        session.reset();
        assert!(session.current().is_empty());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut session = BindingSession::new();
        session.commit_turn(turn(&[success(&[("x", 1)])]));
        session.snapshot("call_1");

        session.teardown();
        session.teardown();

        assert!(session.is_torn_down());
        assert_eq!(session.issued_count(), 0);
        assert!(session.snapshot("call_2").is_empty());
        assert_eq!(session.commit_turn(turn(&[success(&[("x", 1)])])), 0);
    }

    #[test]
    fn test_binding_missing_from_harvest_is_forgotten() {
        let mut session = BindingSession::new();
        session.commit_turn(turn(&[success(&[("x", 1), ("y", 1)])]));

        // The run rebinds `x` to something unportable; only `y` comes back.
        session.snapshot("call_rebind");
        let harvested = success(&[("y", 2)]);
        session.commit_turn([("call_rebind", &harvested)]);

        assert_eq!(value(&session, "x"), None);
        assert_eq!(value(&session, "y"), Some(2));
    }

    #[test]
    fn test_sibling_harvest_keeps_names_it_was_not_seeded_with() {
        let mut session = BindingSession::new();
        session.snapshot("call_a");
        session.commit_turn(turn(&[success(&[("x", 1)])]));

        // `call_a` started from an empty seed, so it cannot drop `x`.
        let harvested = success(&[("z", 3)]);
        session.commit_turn([("call_a", &harvested)]);

        assert_eq!(value(&session, "x"), Some(1));
        assert_eq!(value(&session, "z"), Some(3));
    }
}
