//! Run snapshot persistence.

use dashmap::DashMap;

use research_agent_core::{ConversationRecord, ConversationStore, Result, RunStatus};

/// In-memory conversation store.
pub struct InMemoryConversationStore {
    records: DashMap<String, ConversationRecord>,
}

impl InMemoryConversationStore {
    /// Create a new in-memory conversation store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Get the number of stored runs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save(&self, record: &ConversationRecord) -> Result<()> {
        self.records.insert(record.run_id.clone(), record.clone());
        tracing::debug!(run_id = %record.run_id, turns = record.turns.len(), "Run saved");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.records.get(run_id).map(|r| r.clone()))
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        self.records.remove(run_id);
        tracing::debug!(run_id = %run_id, "Run deleted");
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == RunStatus::Running)
            .map(|r| r.key().clone())
            .collect())
    }
}
