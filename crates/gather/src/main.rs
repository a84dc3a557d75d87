mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gather_config::{Config, load_config};
use gather_core::Catalog;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.global.config.as_deref())?;

    match cli.command {
        // Config commands don't need an API client
        Command::Config(ref args) => commands::config_cmd::handle(args, &config, &cli.global),

        Command::Get(args) => {
            let catalog = build_catalog(config, &cli.global)?;
            commands::get::by_ids(args, &catalog, &cli.global).await
        }

        Command::GetPath(args) => {
            let catalog = build_catalog(config, &cli.global)?;
            commands::get::by_paths(args, &catalog, &cli.global).await
        }
    }
}

/// Build a `Catalog` from the config file, environment, and CLI overrides.
fn build_catalog(mut config: Config, global: &GlobalOpts) -> Result<Catalog, CliError> {
    if global.insecure {
        config.api.insecure = true;
    }
    let catalog_config = config.catalog_config(global.base_url.as_deref())?;
    let url = catalog_config.client.base_url.to_string();

    Catalog::new(&catalog_config).map_err(|source| CliError::Client { url, source })
}
