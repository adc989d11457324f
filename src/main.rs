//! Research Agent - tool-using research assistant
//!
//! Runs a ReAct loop against an OpenAI-compatible model, dispatching each
//! turn's tool calls concurrently and executing code snippets in a sandbox
//! whose variables persist across the run.

mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use research_agent_controller::{InMemoryConversationStore, ResearchAgent, TerminateHandle};
use research_agent_core::config::{AppConfig, SandboxMode};
use research_agent_core::traits::{LlmClient, ToolRegistry};
use research_agent_model_gateway::OpenAiCompatClient;
use research_agent_sandbox::CodeRunner;
use research_agent_skills::{register_remote_tools, CurrentTimeTool, DefaultToolRegistry, EchoTool};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SandboxArg {
    Process,
    Thread,
}

impl From<SandboxArg> for SandboxMode {
    fn from(arg: SandboxArg) -> Self {
        match arg {
            SandboxArg::Process => SandboxMode::Process,
            SandboxArg::Thread => SandboxMode::Thread,
        }
    }
}

/// Run the research agent on a goal.
#[derive(Debug, Parser)]
#[command(name = "research-agent", version, about)]
struct Cli {
    /// Directory holding default.toml, {APP_ENV}.toml and local.toml.
    #[arg(long, default_value = "config")]
    config: PathBuf,

    /// Sandbox used for code execution.
    #[arg(long, value_enum)]
    sandbox: Option<SandboxArg>,

    /// Maximum number of model turns.
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// What the agent should find out.
    goal: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(mode) = cli.sandbox {
        config.sandbox.mode = mode.into();
    }
    if let Some(max_rounds) = cli.max_rounds {
        config.agent.max_rounds = Some(max_rounds);
    }

    telemetry::configure_tracing(cli.json_logs || config.logging.json)?;
    tracing::info!("Starting Research Agent v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Skills & Tools
    // =========================================================================
    let tools = Arc::new(DefaultToolRegistry::new());
    tools.register(Box::new(EchoTool)).await?;
    tools.register(Box::new(CurrentTimeTool)).await?;
    let remote = register_remote_tools(tools.as_ref(), &config.tools).await?;
    tracing::info!(tools_count = tools.len(), remote, "Skills registry initialized");

    // =========================================================================
    // Sandbox & Model
    // =========================================================================
    let code_runner = Arc::new(CodeRunner::from_settings(&config.sandbox)?);
    tracing::info!(sandbox = %code_runner.sandbox_kind(), "Code execution enabled");

    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(config.model.clone())?);
    tracing::info!(model = %config.model.model, base_url = %config.model.base_url, "Model client initialized");

    // =========================================================================
    // Controller
    // =========================================================================
    let terminate = TerminateHandle::new();
    let agent = ResearchAgent::builder()
        .with_config(config.agent.clone())
        .with_llm(llm)
        .with_tools(tools)
        .with_code_runner(code_runner)
        .with_store(Arc::new(InMemoryConversationStore::new()))
        .with_terminate_handle(terminate.clone())
        .build()?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, stopping after the current turn");
            terminate.terminate();
        }
    });

    let run = agent.run(&cli.goal).await?;
    match &run.final_answer {
        Some(answer) => println!("{}", answer),
        None => println!("No final answer: {}", run.stop_reason),
    }

    Ok(())
}
