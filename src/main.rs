use mcp_args_relay::{build_relay, config::Config, logging, transport};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env(std::env::args().nth(1))?;
    let (relay, host) = build_relay(&config)?;

    info!(
        command_template = %config.command_template,
        update_tool = %config.update_tool_name,
        call_timeout_secs = config.call_timeout.map(|timeout| timeout.as_secs()),
        "relay starting"
    );

    transport::stdio::serve(
        relay,
        tokio::io::stdin(),
        tokio::io::stdout(),
        host.outbound,
        host.queued,
    )
    .await?;
    Ok(())
}
