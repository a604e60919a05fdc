//! Redmine MCP Server - Redmine through its web interface via MCP
//!
//! This server logs in to Redmine like a browser and exposes issue discovery,
//! validation, creation and search as MCP tools.

use pulseengine_mcp_server::McpServerBuilder;
use redmine_mcp_server::RedmineMcpServer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configure logging for STDIO transport
    RedmineMcpServer::configure_stdio_logging();

    info!("Starting Redmine MCP Server...");

    let redmine_server = match RedmineMcpServer::new().await {
        Ok(server) => {
            info!("Redmine MCP Server created successfully");
            server
        }
        Err(e) => {
            error!("Failed to create Redmine MCP Server: {}", e);
            eprintln!("❌ Failed to start Redmine MCP Server: {}", e);
            eprintln!("\nPlease check:");
            eprintln!("  - REDMINE_URL environment variable is set to http(s)://your-redmine");
            eprintln!("  - Timeouts are between 1 second and one week, REDMINE_PER_PAGE between 1 and 100");
            eprintln!("  - redmine-mcp-config.toml, if present, is valid TOML");
            eprintln!("\nFor help, see the README.md file.");
            std::process::exit(1);
        }
    };

    info!("Starting MCP server with STDIO transport...");

    // The tool handlers share the session with this handle
    let mut server = redmine_server.clone().serve_stdio().await?;

    info!("🚀 Redmine MCP Server is running and ready to serve requests");

    let outcome = server.run().await;

    // Release the Redmine session however the server loop ended
    redmine_server.shutdown().await;

    outcome?;
    Ok(())
}
