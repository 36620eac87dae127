//! sshmcp - MCP server/client stack for remote SSH execution.
//!
//! Subcommands:
//! - `serve`: MCP server over stdio (frames on stdout, logs on stderr)
//! - `http`:  MCP server over HTTP/SSE
//! - `tools`: connect configured servers and list their tools
//! - `call`:  one-shot tool invocation through the client stack
//!
//! Logging always goes to stderr. For the stdio transport that is a hard
//! requirement: stdout must carry nothing but JSON-RPC frames.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sshmcp::client::{McpService, ToolCaller};
use sshmcp::config::Config;
use sshmcp::protocol::ClientInfo;
use sshmcp::server::McpServer;
use sshmcp::transport;

/// sshmcp - remote SSH execution over the Model Context Protocol.
#[derive(Parser, Debug)]
#[command(name = "sshmcp", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "sshmcp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP over stdio
    Serve,
    /// Serve MCP over HTTP/SSE
    Http {
        /// Listen port (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect the configured servers and list their tools
    Tools,
    /// Call one tool, e.g. `--tool lab.ssh_execute --args '{"host":"web1","command":"uptime"}'`
    Call {
        /// Qualified tool name (`<server>.<tool>`)
        #[arg(long)]
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sshmcp=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            eprintln!("sshmcp: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve => {
            tracing::info!(server = %config.server.name, "starting stdio MCP server");
            let server = McpServer::new(&config);
            transport::stdio::serve(server.clone()).await?;
            server.shutdown();
        }

        Command::Http { port } => {
            let port = port.unwrap_or(config.server.port);
            let server = McpServer::new(&config);
            let shutdown = CancellationToken::new();

            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, shutting down");
                    signal_token.cancel();
                }
            });

            transport::http::serve(server.clone(), port, shutdown).await?;
            server.shutdown();
        }

        Command::Tools => {
            let service = connect_service(&config).await?;
            for tool in service.list_tools() {
                println!("{}\n    {}", tool.qualified_name, tool.tool.description);
            }
            service.close_all().await;
        }

        Command::Call { tool, args } => {
            let arguments: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| format!("--args must be a JSON object: {e}"))?;

            let service = connect_service(&config).await?;
            let result = service.call_tool(&tool, arguments).await;
            service.close_all().await;

            let result = result?;
            if result.is_error {
                eprintln!("tool reported an error:");
            }
            println!("{}", result.joined_text());
        }
    }

    Ok(())
}

async fn connect_service(config: &Config) -> Result<McpService, Box<dyn std::error::Error>> {
    if config.mcp.servers.is_empty() {
        return Err("no [[mcp.servers]] configured".into());
    }
    let client_info = ClientInfo {
        name: "sshmcp".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let timeout = Duration::from_secs(config.server.request_timeout_secs);
    Ok(McpService::connect_all(&config.mcp.servers, client_info, timeout).await?)
}
