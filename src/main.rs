use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use supercollager::{Cli, Dispatcher, Studio};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    if let Some(model_path) = &cli.model_path {
        ensure!(
            model_path.exists(),
            "Model path does not exist: {}",
            model_path.display()
        );
    }
    ensure!(cli.num_threads > 0, "Thread count must be at least 1");

    ThreadPoolBuilder::new()
        .num_threads(cli.num_threads)
        .build_global()?;

    let studio = Studio::for_command(&cli.command, cli.model_path.as_deref(), cli.device_id)
        .context("Failed to load models")?;
    let dispatcher = Dispatcher::new(studio, &cli.dump_dir);

    let paths = dispatcher
        .run(&cli.command)
        .with_context(|| format!("{} failed", cli.command.name()))?;
    for path in &paths {
        info!(path = %path.display(), "written");
    }

    Ok(())
}
