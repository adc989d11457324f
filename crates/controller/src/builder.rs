//! Builder for ResearchAgent.

use std::sync::Arc;

use research_agent_core::config::AgentConfig;
use research_agent_core::{ConversationStore, Error, LlmClient, Result, ToolRegistry};
use research_agent_sandbox::CodeRunner;

use crate::conversation::TerminateHandle;
use crate::dispatcher::{DispatcherConfig, ToolCallDispatcher};
use crate::react::ResearchAgent;

/// Builder for constructing a ResearchAgent.
pub struct ResearchAgentBuilder {
    config: AgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: Option<Arc<dyn ToolRegistry>>,
    code_runner: Option<Arc<CodeRunner>>,
    store: Option<Arc<dyn ConversationStore>>,
    terminate: Option<TerminateHandle>,
}

impl ResearchAgentBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
            llm: None,
            tools: None,
            code_runner: None,
            store: None,
            terminate: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the LLM client.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the tool registry.
    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Enable code execution (and `reset_session`) through this runner.
    pub fn with_code_runner(mut self, runner: Arc<CodeRunner>) -> Self {
        self.code_runner = Some(runner);
        self
    }

    /// Set the conversation store.
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share an existing terminate handle, e.g. one wired to Ctrl-C.
    pub fn with_terminate_handle(mut self, handle: TerminateHandle) -> Self {
        self.terminate = Some(handle);
        self
    }

    /// Build the ResearchAgent.
    pub fn build(self) -> Result<ResearchAgent> {
        let llm = self
            .llm
            .ok_or_else(|| Error::controller("LLM client not configured"))?;
        if self.config.persist && self.store.is_none() {
            tracing::warn!("agent.persist is set but no conversation store was configured");
        }

        let dispatcher = ToolCallDispatcher::new(
            self.tools,
            self.code_runner,
            DispatcherConfig::from(&self.config),
        );

        Ok(ResearchAgent {
            config: self.config,
            llm,
            dispatcher,
            store: self.store,
            terminate: self.terminate.unwrap_or_default(),
        })
    }
}

impl Default for ResearchAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_llm() {
        let err = ResearchAgentBuilder::new().build().err().unwrap();
        assert!(matches!(err, Error::Controller(_)));
    }

    #[test]
    fn test_shared_terminate_handle() {
        let handle = TerminateHandle::new();
        let agent = ResearchAgentBuilder::new()
            .with_llm(Arc::new(research_agent_core::mocks::MockLlm::texts(&[])))
            .with_terminate_handle(handle.clone())
            .build()
            .unwrap();

        handle.terminate();
        assert!(agent.terminate_handle().is_terminated());
    }
}
