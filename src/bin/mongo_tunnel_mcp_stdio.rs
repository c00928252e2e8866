#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use dotenv::dotenv;
use mongo_tunnel_mcp::mcp::{self, McpMongoCommands};
use poem_mcpserver::McpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    mcp::logging::init();

    let sessions = mcp::default_session_manager();
    let served =
        poem_mcpserver::stdio::stdio(McpServer::new().tools(McpMongoCommands::new(sessions.clone())))
            .await;

    sessions.disconnect().await;
    served?;
    Ok(())
}
