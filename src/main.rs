use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use slack_relay::config::{self, Config};
use slack_relay::dispatch::{DebugRunner, PollLoop};
use slack_relay::rules::RuleSet;
use slack_relay::slack::SlackClient;

#[derive(Parser)]
#[command(name = "slack-relay")]
#[command(version)]
#[command(about = "Relay matching Slack messages from one channel to others")]
struct Cli {
    /// Evaluate the rules against recent history and exit without posting
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config_path = config::config_path();
    let mut config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let rules = RuleSet::compile(&config)?;

    eprintln!("slack-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", config_path.display());
    eprintln!("   Source channel: {}", config.source_channel);
    eprintln!("   Rules: {}", rules.len());

    let token = config.slack_bot_token.take().context("bot token missing")?;
    let client = Arc::new(SlackClient::new(token));

    if cli.debug {
        eprintln!("   Mode: debug (dry run, nothing is posted)\n");
        let report = DebugRunner::new(client, rules).run().await?;
        print!("{report}");
        return Ok(());
    }

    eprintln!();
    PollLoop::new(client, rules).run().await;

    Ok(())
}
