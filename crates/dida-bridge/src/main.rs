mod bootstrap_helpers;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dida_bridge::{bridge_tool_catalog, execute_bridge_tool_until, BridgeConfig, Cli, CliCommand};

use crate::bootstrap_helpers::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        CliCommand::Tools => {
            let rendered = serde_json::to_string_pretty(&bridge_tool_catalog())
                .context("failed to render tool catalog")?;
            println!("{rendered}");
            Ok(())
        }
        CliCommand::Call { tool, args } => {
            let config = BridgeConfig::resolve(cli.config.as_deref(), cli.config_overrides())?;
            let output =
                execute_bridge_tool_until(&config, tool, args.clone(), wait_for_ctrl_c()).await;
            let rendered =
                serde_json::to_string_pretty(&output).context("failed to render tool output")?;
            println!("{rendered}");
            if output.is_error {
                bail!(
                    "tool '{}' failed ({})",
                    tool,
                    output.error_kind.unwrap_or("error")
                );
            }
            Ok(())
        }
    }
}

async fn wait_for_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
