//! Command-line interface for toolrelay

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use toolrelay_client::{CircuitStatus, FileServerStore, ServerStore, ToolClient, ToolOutput};
use toolrelay_utils::LogFormat;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "toolrelay")]
#[command(about = "Discover and call tools on remote tool servers", long_about = None)]
struct Args {
    /// Configuration file (defaults to $TOOLRELAY_CONFIG or ./toolrelay.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured servers with their circuit state
    Servers,

    /// List the tools of one server
    Tools {
        server: String,
    },

    /// Show the merged tool catalog of all active servers
    Catalog,

    /// Find the server serving a tool
    Find {
        tool: String,
    },

    /// Call a tool
    Call {
        tool: String,

        /// Server to call; resolved from the tool index when omitted
        #[arg(short, long)]
        server: Option<String>,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Credential overriding the one stored with the server
        #[arg(long)]
        credential: Option<String>,
    },

    /// Drop cached tool lists, index and catalog
    Clear {
        #[arg(short, long)]
        server: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    toolrelay_utils::init_tracing_with(format, if args.verbose { "debug" } else { "warn" });

    let path = toolrelay_utils::require_config(args.config.as_deref())?;
    debug!("Using configuration {}", path.display());

    let store = Arc::new(FileServerStore::open(&path).context("Failed to load configuration")?);
    let settings = store.config().settings;
    let client = ToolClient::builder(store.clone()).settings(settings).build();

    match args.command {
        Command::Servers => servers(&client, &store),
        Command::Tools { server } => tools(&client, &server),
        Command::Catalog => catalog(&client),
        Command::Find { tool } => {
            println!("{}", client.find_tool_server(&tool)?);
            Ok(())
        }
        Command::Call {
            tool,
            server,
            args,
            credential,
        } => call(&client, &tool, server.as_deref(), &args, credential.as_deref()),
        Command::Clear { server } => {
            client.clear_cache(server.as_deref())?;
            info!("Cache cleared");
            Ok(())
        }
    }
}

fn servers(client: &ToolClient, store: &FileServerStore) -> anyhow::Result<()> {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Server", "Transport", "Active", "Circuit"]);

    for server in store.descriptors()? {
        let circuit = match client.circuit_state(&server.name).status {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half-open",
        };
        table.add_row(vec![
            server.name.clone(),
            server.transport.to_string(),
            if server.is_active { "yes" } else { "no" }.to_string(),
            circuit.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn tools(client: &ToolClient, server: &str) -> anyhow::Result<()> {
    let tools = client
        .discover_tools(server)
        .with_context(|| format!("Failed to discover tools of '{server}'"))?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Tool", "Description"]);
    for tool in tools {
        table.add_row(vec![tool.name, tool.description]);
    }

    println!("{table}");
    Ok(())
}

fn catalog(client: &ToolClient) -> anyhow::Result<()> {
    let catalog = client.get_all_tools_cached()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Tool", "Description", "Required"]);
    for tool in &catalog {
        let required = tool.parameters["required"]
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        table.add_row(vec![tool.name.clone(), tool.description.clone(), required]);
    }

    println!("{table}");
    println!("{} tools", catalog.len());
    Ok(())
}

fn call(
    client: &ToolClient,
    tool: &str,
    server: Option<&str>,
    args: &str,
    credential: Option<&str>,
) -> anyhow::Result<()> {
    let arguments: Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let outcome = match server {
        Some(server) => client.call_tool(server, tool, arguments, credential),
        None => client.invoke(tool, arguments, credential),
    };

    let output = ToolOutput::from_outcome(outcome);
    println!("{}", serde_json::to_string_pretty(&output.to_value())?);

    if output.is_error {
        bail!("Tool '{tool}' failed");
    }
    Ok(())
}
