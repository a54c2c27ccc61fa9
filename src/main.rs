//! Tool Agent - interactive terminal entry point.

use std::process::ExitCode;
use std::sync::Arc;

use tool_agent::agent::{build_system_prompt, Agent, AgentSettings};
use tool_agent::console::{StdinReader, TerminalOutput};
use tool_agent::llm::AnthropicClient;
use tool_agent::tools::ToolRegistry;
use tool_agent::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging on stderr so it stays out of the chat
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tool_agent=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    info!(
        "Loaded configuration: model={} workspace={}",
        config.model,
        config.workspace_path.display()
    );

    let tools = ToolRegistry::new(config.workspace_path.clone());
    if config.system_prompt.is_none() {
        config.system_prompt = Some(build_system_prompt(&tools));
    }

    let client = Arc::new(AnthropicClient::from_config(&config)?);
    let mut agent = Agent::new(
        client,
        tools,
        Box::new(StdinReader::new()),
        Box::new(TerminalOutput::stdout()),
        AgentSettings {
            max_output_tokens: config.max_output_tokens,
        },
    );

    tokio::select! {
        result = agent.run() => match result {
            Err(e) if e.is_end_of_input() => {
                info!("Input closed");
                Ok(())
            }
            other => other.map_err(Into::into),
        },
        _ = tokio::signal::ctrl_c() => {
            println!();
            info!("Interrupted");
            Ok(())
        }
    }
}
