//! Init command implementation
//!
//! Writes a default `jnana.toml`, a `.env.example` and the sessions directory.

use super::output::Output;
use crate::utils::toml_config::JnanaConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of the init operation
#[derive(Debug, PartialEq, Eq)]
pub enum InitResult {
    /// Initialization completed successfully
    Success,
    /// jnana.toml already exists and --force was not given
    AlreadyExists,
    /// An error occurred during initialization
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: PathBuf,
    /// Overwrite existing files
    pub force: bool,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing Jnana");

    let base_path = &config.path;
    let config_path = base_path.join("jnana.toml");
    if config_path.exists() && !config.force {
        output.warning("jnana.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    let defaults = JnanaConfig::default();
    let sessions_dir = base_path.join(&defaults.session.sessions_dir);
    if sessions_dir.exists() {
        output.skipped(&defaults.session.sessions_dir.display().to_string(), "already exists");
    } else if let Err(e) = fs::create_dir_all(&sessions_dir) {
        output.error(&format!("Failed to create {}: {}", sessions_dir.display(), e));
        return InitResult::Error(e.to_string());
    } else {
        output.created("directory", &defaults.session.sessions_dir.display().to_string());
    }

    let toml_content = match generate_jnana_toml(&defaults) {
        Ok(content) => content,
        Err(e) => {
            output.error(&format!("Failed to render jnana.toml: {}", e));
            return InitResult::Error(e);
        }
    };
    if let Err(e) = write_file(&config_path, &toml_content, config.force) {
        output.error(&format!("Failed to create jnana.toml: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", "jnana.toml");

    let env_path = base_path.join(".env.example");
    match write_file(&env_path, ENV_EXAMPLE, config.force) {
        Ok(true) => output.created("env", ".env.example"),
        Ok(false) => output.skipped(".env.example", "already exists"),
        Err(e) => output.warning(&format!("Failed to create .env.example: {}", e)),
    }

    output.complete("Jnana initialized");
    output.hint("Start a research run with:");
    output.command("jnana run --goal \"<your research question>\"");
    InitResult::Success
}

fn generate_jnana_toml(config: &JnanaConfig) -> Result<String, String> {
    let body = config.to_toml_string().map_err(|e| e.to_string())?;
    Ok(format!(
        "# Jnana configuration\n\
         # Every value below is the default; delete what you do not change.\n\
         # JNANA_* environment variables override these at startup.\n\n{}",
        body
    ))
}

/// Writes `content` unless the file exists and `force` is false.
/// Returns whether the file was written.
fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    fs::write(path, content)?;
    Ok(true)
}

const ENV_EXAMPLE: &str = "\
# Overrides for jnana.toml
# JNANA_MAX_WORKERS=4
# JNANA_ELO_K_FACTOR=32
# JNANA_DEFAULT_MATCH_COUNT=10
# JNANA_AUTO_SAVE_INTERVAL_SECONDS=300
# JNANA_EVENT_HISTORY_SIZE=1000
# JNANA_LOG_LEVEL=info
# RUST_LOG=jnana=debug
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            InitConfig {
                path: dir.path().to_path_buf(),
                force: false,
            },
            &Output::no_color(),
        );

        assert_eq!(result, InitResult::Success);
        assert!(dir.path().join("sessions").is_dir());
        let written = fs::read_to_string(dir.path().join("jnana.toml")).unwrap();
        let config = JnanaConfig::from_toml_str(&written).unwrap();
        assert_eq!(config, JnanaConfig::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("jnana.toml"), "# mine\n").unwrap();

        let init = |force| {
            run(
                InitConfig {
                    path: dir.path().to_path_buf(),
                    force,
                },
                &Output::no_color(),
            )
        };
        assert_eq!(init(false), InitResult::AlreadyExists);
        assert_eq!(
            fs::read_to_string(dir.path().join("jnana.toml")).unwrap(),
            "# mine\n"
        );
        assert_eq!(init(true), InitResult::Success);
    }
}
