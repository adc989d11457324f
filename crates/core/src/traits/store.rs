//! Conversation persistence traits.

use async_trait::async_trait;
use crate::error::Result;
use crate::types::ConversationRecord;

/// Store for agent run snapshots.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Save (or overwrite) a run snapshot.
    async fn save(&self, record: &ConversationRecord) -> Result<()>;

    /// Load a run snapshot by id.
    async fn load(&self, run_id: &str) -> Result<Option<ConversationRecord>>;

    /// Delete a run snapshot.
    async fn delete(&self, run_id: &str) -> Result<()>;

    /// List ids of runs that are still running.
    async fn list_running(&self) -> Result<Vec<String>>;
}
