use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

mod cli_style;

use cli_style::{
    get_styles, print_empty_list, print_error, print_key_value, print_list_item,
    print_section_footer, print_section_header, print_success, print_warning,
};
use tool_relay::client::{ClientConfig, ToolClient};
use tool_relay::protocol::Frame;

#[derive(Parser, Debug)]
#[command(styles=get_styles(), version, about = "Invoke tools on a tool-relay server")]
struct CliArgs {
    /// Base URL of the server.
    #[clap(long, default_value = "http://127.0.0.1:3001")]
    pub server: String,

    /// Bearer credential sent on every request. Falls back to TOOL_RELAY_TOKEN.
    #[clap(long)]
    pub token: Option<String>,

    /// Seconds to wait for a result before giving up.
    #[clap(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Skip the WebSocket and invoke over plain HTTP.
    #[clap(long)]
    pub http: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invokes a tool and prints its JSON result.
    Invoke {
        tool: String,

        /// Tool parameters as a JSON object.
        #[clap(default_value = "{}")]
        params: String,
    },

    /// Lists the tools the server exposes.
    List,

    /// Subscribes to notifications and prints them until interrupted.
    Listen {
        /// Only receive notifications targeted at this subscriber id.
        #[clap(long)]
        subscriber_id: Option<String>,
    },
}

fn build_client(args: &CliArgs, fallback_tool: Option<&str>) -> ToolClient {
    let mut config = ClientConfig::for_server(&args.server);
    config.request_timeout = Duration::from_secs(args.timeout_secs);
    if let Some(token) = args
        .token
        .clone()
        .or_else(|| std::env::var("TOOL_RELAY_TOKEN").ok())
    {
        config = config.with_token(token);
    }
    if let Some(tool) = fallback_tool {
        config = config.with_fallback_tools([tool]);
    }
    ToolClient::new(config)
}

async fn invoke(args: &CliArgs, tool: &str, params: &str) -> Result<()> {
    let params: Value =
        serde_json::from_str(params).with_context(|| format!("Invalid params JSON: {}", params))?;

    let client = build_client(args, Some(tool));
    if !args.http {
        if let Err(e) = client.connect().await {
            print_warning(&format!("WebSocket unavailable ({}), using HTTP", e));
        }
    }

    let result = client.send_request(tool, params).await;
    client.disconnect();

    let value = result.with_context(|| format!("Invocation of {} failed", tool))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn list(args: &CliArgs) -> Result<()> {
    let client = build_client(args, None);
    let tools = client.list_tools().await.context("Failed to list tools")?;

    print_section_header("Tools");
    if tools.is_empty() {
        print_empty_list("No tools registered");
    }
    for tool in tools {
        print_list_item(&tool.name, 0);
        print_key_value("description", &tool.description);
        print_key_value("cached", if tool.cacheable { "yes" } else { "no" });
    }
    print_section_footer();
    Ok(())
}

async fn listen(args: &CliArgs, subscriber_id: Option<String>) -> Result<()> {
    let client = build_client(args, None);
    let mut notifications = client.notifications();
    client.connect().await.context("Failed to connect")?;
    client.subscribe(subscriber_id)?;
    print_success(&format!(
        "Listening as {}",
        client.connection_id().unwrap_or_default()
    ));

    loop {
        tokio::select! {
            received = notifications.recv() => match received {
                Ok(frame @ Frame::Notification { .. }) => {
                    println!("{}", serde_json::to_string_pretty(&frame)?);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    print_warning(&format!("Skipped {} notification(s)", skipped));
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect();
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let outcome = match &args.command {
        Command::Invoke { tool, params } => invoke(&args, tool, params).await,
        Command::List => list(&args).await,
        Command::Listen { subscriber_id } => listen(&args, subscriber_id.clone()).await,
    };

    if let Err(e) = outcome {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
