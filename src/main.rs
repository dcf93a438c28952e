//! threadrun CLI binary entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use threadrun::cli::commands::{
    handle_assistant, handle_run, handle_send, handle_thread, CliContext,
};
use threadrun::cli::{Cli, Commands};
use threadrun::config::ThreadrunConfig;
use threadrun::error::Result;

const LOG_ENV: &str = "THREADRUN_LOG";

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::debug!(category = ?e.category(), fatal = e.is_fatal(), "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = CliContext::new(ThreadrunConfig::from_env()?)?;
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Send(args) => {
            let mut stderr = std::io::stderr();
            let summary = handle_send(&ctx, args, &mut stdout, &mut stderr).await?;
            tracing::debug!(?summary, "send finished");
            Ok(())
        }
        Commands::Assistant(args) => handle_assistant(&ctx, args.command, &mut stdout).await,
        Commands::Thread(args) => handle_thread(&ctx, args.command, &mut stdout).await,
        Commands::Run(args) => handle_run(&ctx, args.command, &mut stdout).await,
    }
}
