//! Command-line interface: `serve` (default), `config validate`,
//! `config show`, and `version`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use oc_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "opsconductor", about = "OpsConductor pipeline core")]
pub struct Cli {
    /// Path to the TOML config file. Falls back to $OC_CONFIG, then
    /// ./config/opsconductor.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Configuration inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and print every issue found.
    Validate,
    /// Print the effective configuration (defaults + file + env).
    Show,
}

/// Resolve and load the configuration.
///
/// A missing file is not an error — the documented defaults apply and env
/// overrides still land on top. A present-but-invalid file is fatal.
pub fn load_config(cli_path: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = cli_path
        .map(PathBuf::from)
        .or_else(|| std::env::var("OC_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./config/opsconductor.toml"));

    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        Config::default()
    };

    config.apply_env_overrides();
    Ok((config, path))
}

/// Print validation issues; returns `false` when any error-severity issue
/// exists.
pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let (config, _path) = load_config(Some(Path::new("/nonexistent/oc.toml"))).unwrap();
        assert_eq!(config.stages.request_default_deadline_ms, 30_000);
    }

    #[test]
    fn file_values_are_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[llm]\ncontext_window = 4096\n").unwrap();
        let (config, _path) = load_config(Some(file.path())).unwrap();
        assert_eq!(config.llm.context_window, 4096);
    }

    #[test]
    fn garbage_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[[ not toml").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn validate_flags_default_config() {
        // context_window is required, so pristine defaults do not validate.
        let config = Config::default();
        assert!(!validate(&config, Path::new("test.toml")));
    }
}
