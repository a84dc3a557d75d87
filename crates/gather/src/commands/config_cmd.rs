//! Config subcommand handlers.

use gather_config::{Config, config_path};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let mut effective = config.clone();
            if let Some(ref url) = global.base_url {
                effective.api.base_url = Some(url.clone());
            }
            if global.insecure {
                effective.api.insecure = true;
            }
            output::print_output(effective.to_toml()?.trim_end())?;
        }
        ConfigCommand::Path => {
            let path = global.config.clone().unwrap_or_else(config_path);
            output::print_output(&path.display().to_string())?;
        }
    }
    Ok(())
}
