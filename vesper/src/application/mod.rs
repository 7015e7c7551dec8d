pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use vesper_core::{Config, Result};

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::load(cli.config.as_deref())?;
    cli.paths.apply(&mut cfg);
    init_logging(
        cli.log_level.as_deref().unwrap_or(&cfg.log.level),
        &cfg.log.format,
    );

    match cli.command {
        Commands::Store => handlers::handle_store(&cfg),
        Commands::Restore => handlers::handle_restore(&cfg),
        Commands::List => handlers::handle_list(&cfg),
        Commands::Verify => handlers::handle_verify(&cfg),
        Commands::Purge { name } => handlers::handle_purge(&cfg, &name),
        Commands::Secret {
            length,
            alphabets,
            chars,
            list_alphabets,
        } => handlers::handle_secret(length, alphabets, chars, list_alphabets),
        Commands::Interactive => handlers::handle_interactive(&cfg),
    }
}

/// Logs go to stderr so summaries on stdout stay machine-readable.
fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
