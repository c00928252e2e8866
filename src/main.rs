#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use dotenv::dotenv;
use mongo_tunnel_mcp::mcp::{self, McpMongoCommands};
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    mcp::logging::init();

    let mcp_port: u16 = std::env::var("MCP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let mcp_addr = format!("0.0.0.0:{}", mcp_port);
    info!("Starting MCP server on {}", mcp_addr);

    // One session manager for every MCP client: the tunnel is process-wide
    let sessions = mcp::default_session_manager();

    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint({
                let sessions = sessions.clone();
                move |_| McpServer::new().tools(McpMongoCommands::new(sessions.clone()))
            }),
        )
        .with(Tracing);

    info!("MongoDB MCP server is ready");
    info!("Use the connect tool to open the SSH tunnel and MongoDB session");

    let served = Server::new(TcpListener::bind(mcp_addr))
        .name("MongoDB Tunnel MCP Server")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            None,
        )
        .await;

    if sessions.disconnect().await {
        info!("Closed MongoDB session and SSH tunnel on shutdown");
    }
    served?;
    Ok(())
}
