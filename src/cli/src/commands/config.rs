//! Configuration commands.
//!
//! The effective configuration comes from `--config <file>`, else
//! `~/.roam/config.toml` when it exists, with `ROAM__` environment
//! variables layered on top.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};

use roam_core::config::Config;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print the path of the configuration file in use
    Path,
}

/// Return the path to the default configuration file (`~/.roam/config.toml`).
fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".roam").join("config.toml"))
}

fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_path().filter(|p| p.exists()),
    }
}

/// Load the effective configuration.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    match resolve_path(explicit) {
        Some(path) => {
            Config::from_file(&path).with_context(|| format!("Failed to load {}", path.display()))
        }
        None => Config::load().context("Failed to load configuration from the environment"),
    }
}

pub fn execute(cmd: ConfigCommands, config: &Config, explicit: Option<&Path>, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Table => {
                let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
                output::print_header("Configuration");
                println!("{}", content);
                Ok(())
            }
            _ => output::print_item(config, format),
        },

        ConfigCommands::Path => {
            match resolve_path(explicit) {
                Some(path) => match format {
                    OutputFormat::Table => output::print_detail("File", &path.display().to_string()),
                    _ => output::print_item(&serde_json::json!({ "path": path }), format)?,
                },
                None => output::print_info("No configuration file; using defaults and ROAM__ environment variables."),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[migration]\ncheckpoint_timeout = \"250ms\"").unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.migration.checkpoint_timeout, std::time::Duration::from_millis(250));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(load(Some(Path::new("/nowhere/roam.toml"))).is_err());
    }
}
