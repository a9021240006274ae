pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Load configuration by merging global, workspace, and CLI sources.
/// Precedence: CLI > explicit --config file > workspace config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply). An explicit
/// `--config` path that cannot be read or parsed is an error.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/autoloop/autoloop.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Explicit config file, if given on the command line.
    let explicit = match cli_config_path(cli) {
        Some(path) => load_explicit_config(&path)?,
        None => PartialConfig::default(),
    };

    // Determine workspace path for loading workspace config.
    let workspace_path = cli_workspace(cli)
        .or_else(|| explicit.workspace.clone())
        .or_else(|| global.workspace.clone())
        .unwrap_or_else(|| PathBuf::from("./workspace"));

    // Layer 3: Workspace config (workspace/autoloop.toml)
    let workspace = load_workspace_config(&workspace_path);

    // Layer 4: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    let config = cli_partial
        .with_fallback(explicit)
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize();

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load workspace config from workspace/autoloop.toml.
/// Returns empty PartialConfig if file not found.
fn load_workspace_config(workspace_path: &Path) -> PartialConfig {
    let config_path = workspace_path.join("autoloop.toml");
    load_toml_file(&config_path).unwrap_or_default()
}

/// Load a config file named on the command line. Unlike the implicit layers,
/// failures here are reported to the caller.
fn load_explicit_config(path: &Path) -> anyhow::Result<PartialConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config at {}", path.display()))?;
    parse_config(&contents, path)
}

/// Parse TOML text into a PartialConfig.
pub fn parse_config(contents: &str, path: &Path) -> anyhow::Result<PartialConfig> {
    let file = toml::from_str::<ConfigFile>(contents).map_err(|e| crate::error::ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(file.to_partial())
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse errors are logged and ignored.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match parse_config(&contents, path) {
            Ok(partial) => {
                tracing::info!("Loaded config from {}", path.display());
                Some(partial)
            }
            Err(e) => {
                tracing::warn!("Config parse error: {:#}", e);
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/autoloop/autoloop.toml
/// macOS: ~/Library/Application Support/autoloop/autoloop.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "autoloop")
        .map(|dirs| dirs.config_dir().join("autoloop.toml"))
}

fn cli_workspace(cli: &Cli) -> Option<PathBuf> {
    match &cli.command {
        Commands::Run { workspace, .. } => workspace.clone(),
        Commands::Commands { workspace, .. } => workspace.clone(),
    }
}

fn cli_config_path(cli: &Cli) -> Option<PathBuf> {
    match &cli.command {
        Commands::Run { config, .. } => config.clone(),
        Commands::Commands { config, .. } => config.clone(),
    }
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    match &cli.command {
        Commands::Run {
            model,
            fast_model,
            workspace,
            continuous,
            max_turns,
            name,
            role,
            goals,
            config: _,
        } => PartialConfig {
            smart_model: model.clone(),
            fast_model: fast_model.clone(),
            workspace: workspace.clone(),
            // A bare flag can only switch continuous mode on.
            continuous: continuous.then_some(true),
            max_turns: *max_turns,
            agent_name: name.clone(),
            agent_role: role.clone(),
            agent_goals: (!goals.is_empty()).then(|| goals.clone()),
            ..Default::default()
        },
        Commands::Commands { workspace, .. } => PartialConfig {
            workspace: workspace.clone(),
            ..Default::default()
        },
    }
}
