//! mcp-chat - Chat with an LLM agent that calls MCP server tools
//!
//! Main entry point: loads `.env`, parses the command line, starts the
//! configured MCP servers and runs the interactive chat.

use anyhow::Result;

use mcp_chat::agent::Agent;
use mcp_chat::chat;
use mcp_chat::cli::Cli;
use mcp_chat::config::Config;
use mcp_chat::logging::init_logging;
use mcp_chat::mcp::McpManager;
use mcp_chat::providers::create_provider;

#[tokio::main]
async fn main() {
    // A missing .env file is fine; variables may come from the environment.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse_args();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }
    match dotenv {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => tracing::warn!("Failed to load .env: {}", e),
    }

    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;

    tracing::info!("Initializing model... {}\n", config.llm.redacted_json());
    let provider = create_provider(&config.llm)?;

    let mut manager = McpManager::connect_all(&config.mcp_servers, &cli.log_dir).await?;

    // Servers must be shut down on every path from here on, Ctrl-C included.
    let session = chat_session(&config, provider, &manager, cli.verbose);
    let result = chat::run_until_interrupted(session, tokio::signal::ctrl_c()).await;
    manager.shutdown().await;
    result
}

async fn chat_session(
    config: &Config,
    provider: Box<dyn mcp_chat::providers::Provider>,
    manager: &McpManager,
    verbose: bool,
) -> Result<()> {
    let mut agent = Agent::new(provider, manager.tools(), config.agent.clone())?
        .with_system_prompt(config.llm.system_prompt.as_deref());

    chat::run_chat(&mut agent, &config.example_queries, verbose).await
}
