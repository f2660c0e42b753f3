//! Basic usage example for toolrelay-client
//!
//! This example demonstrates:
//! - Registering tool servers in an in-memory store
//! - Building the process-wide client
//! - Reading the merged tool catalog
//! - Calling a tool and converting the outcome for an agent
//!
//! Run with: cargo run --example basic_usage -- <server-url> <tool> [json-args]

use serde_json::{Value, json};
use std::sync::Arc;
use toolrelay_client::{
    MemoryServerStore, ServerDescriptor, ToolClient, ToolOutput, TransportKind,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    toolrelay_utils::init_tracing();

    let mut argv = std::env::args().skip(1);
    let url = argv
        .next()
        .unwrap_or_else(|| "http://localhost:8000/mcp".to_string());
    let tool = argv.next().unwrap_or_else(|| "echo".to_string());
    let arguments: Value = match argv.next() {
        Some(raw) => serde_json::from_str(&raw)?,
        None => json!({}),
    };

    println!("=== toolrelay basic usage ===\n");

    // 1. Describe the servers this process may call
    let store = Arc::new(MemoryServerStore::with_servers([ServerDescriptor::http(
        "demo",
        TransportKind::StreamingHttp,
        url.clone(),
    )]));
    println!("1. Registered server 'demo' at {url}");

    // 2. Install the process-wide client
    let client = ToolClient::init_global(ToolClient::builder(store).build())?;
    println!("2. Client ready\n");

    // 3. Catalog of every active server
    match client.get_all_tools_cached() {
        Ok(catalog) => {
            println!("3. {} tools available:", catalog.len());
            for entry in &catalog {
                println!("   - {}: {}", entry.name, entry.description);
            }
        }
        Err(e) => println!("3. Catalog unavailable: {e}"),
    }
    println!();

    // 4. Call the tool; failures become an error payload
    println!("4. Calling '{tool}'...");
    let output = ToolOutput::from_outcome(client.invoke(&tool, arguments, None));
    println!("{}", serde_json::to_string_pretty(&output.to_value())?);

    let state = client.circuit_state("demo");
    println!(
        "\nCircuit for 'demo': {:?} ({} consecutive failures)",
        state.status, state.consecutive_failures
    );

    Ok(())
}
