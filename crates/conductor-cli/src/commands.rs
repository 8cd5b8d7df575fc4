//! Subcommand implementations for the demonstration binary.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use conductor_core::SessionId;
use conductor_llm::{ScriptedProvider, ScriptedTurn};
use conductor_mcp::{McpClient, ServersConfig, Transport};
use conductor_runtime::{Agent, AgentOptions};

/// A fixed scripted reply used in place of a real LLM HTTP client, which is
/// outside this crate's scope.
fn demo_provider(reply: impl Into<String>) -> ScriptedProvider {
    ScriptedProvider::new(vec![ScriptedTurn::text(reply)])
}

fn load_config(config_path: Option<&Path>) -> Result<ServersConfig> {
    match config_path {
        Some(path) => ServersConfig::load(path).context("failed to load servers config"),
        None => ServersConfig::load_default().context("failed to load default servers config"),
    }
}

/// Ask one question against the demo provider and print the answer.
pub async fn ask(config_path: Option<&Path>, question: &str) -> Result<()> {
    let llm = Arc::new(demo_provider(format!("(demo reply) you asked: {question}")));
    let agent = Agent::new(llm, config_path, AgentOptions::default())
        .await
        .context("failed to build agent")?;

    let session = SessionId::new("cli-ask");
    let answer = agent
        .ask(&session, question, || false)
        .await
        .context("turn loop failed")?;
    println!("{answer}");

    agent.close().await;
    Ok(())
}

/// A line-at-a-time REPL against the demo provider.
pub async fn chat(config_path: Option<&Path>) -> Result<()> {
    let llm = Arc::new(demo_provider("(demo reply) noted."));
    let agent = Agent::new(llm, config_path, AgentOptions::default())
        .await
        .context("failed to build agent")?;

    let session = SessionId::new("cli-chat");
    println!("{}", "conductor demo chat -- type a message, or 'exit' to quit.".cyan());

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        match agent.ask(&session, line, || false).await {
            Ok(answer) => println!("{answer}"),
            Err(e) => println!("{} {e}", "error:".red()),
        }
    }

    agent.close().await;
    Ok(())
}

/// List the MCP servers configured for this agent.
pub fn servers(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.servers.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    for name in config.list() {
        let server = config.get(name).expect("name came from list()");
        let transport = match server.transport {
            Transport::Stdio => "stdio",
            Transport::Sse => "sse",
        };
        let auto = if server.auto_start { " (auto-start)" } else { "" };
        println!("{}: {transport}{auto}", name.bold());
    }
    Ok(())
}

/// Load config and connect every auto-start MCP server, reporting the
/// outcome.
pub async fn doctor(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "conductor doctor".cyan().bold());

    print!("  Servers config... ");
    let config = load_config(config_path)?;
    println!("{} ({} server(s))", "OK".green(), config.servers.len());

    print!("  Auto-start servers... ");
    let client = McpClient::with_config(config);
    match client.connect_auto_servers().await {
        Ok(()) => println!("{}", "OK".green()),
        Err(e) => println!("{} {e}", "FAIL".red()),
    }

    Ok(())
}
