//! Operator configuration for promote.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PROMOTE_HOME)
//! 2. Config file (.promote/config.yaml)
//! 3. Defaults (~/.promote, `sh`, 30 minute command timeout)
//!
//! Config file discovery:
//! - Searches current directory and parents for .promote/config.yaml
//! - `paths.home` is relative to the .promote/ directory, `paths.pipelines`
//!   to the project root (the parent of .promote/)
//!
//! ```yaml
//! version: "1"
//! paths:
//!   home: ./state
//!   pipelines: ./pipelines
//! shell:
//!   program: bash
//!   timeout_seconds: 900
//! provisioner:
//!   mode: command
//!   commands:
//!     data_store: npx cdk deploy --require-approval never {stage}-{unit}
//!     api_service: npx cdk deploy --require-approval never {stage}-{unit}
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::UnitKind;

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "PROMOTE_HOME";

const CONFIG_DIR: &str = ".promote";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub shell: Option<ShellConfig>,
    #[serde(default)]
    pub provisioner: Option<ProvisionerSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .promote/)
    pub home: Option<String>,
    /// Pipeline definitions directory (relative to project root)
    pub pipelines: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellConfig {
    pub program: Option<String>,
    pub working_dir: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Settings for the shell command runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSettings {
    pub program: String,
    pub working_dir: Option<PathBuf>,
    pub timeout_seconds: u64,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            working_dir: None,
            timeout_seconds: 1800,
        }
    }
}

/// How deployable units are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerMode {
    /// Run the configured command template per unit kind
    #[default]
    Command,
    /// Log only
    DryRun,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProvisionerSettings {
    #[serde(default)]
    pub mode: ProvisionerMode,

    /// Command template per unit kind; `{unit}`, `{kind}`, `{stage}` and
    /// `{environment}` are substituted
    #[serde(default)]
    pub commands: HashMap<UnitKind, String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// Where `promote run <name>` looks for `<name>.yaml`
    pub pipelines_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub shell: ShellSettings,
    pub provisioner: ProvisionerSettings,
}

impl ResolvedConfig {
    /// Directory holding one journal directory per run
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// Locate a pipeline definition by name or path
    pub fn pipeline_path(&self, name: &str) -> PathBuf {
        let direct = PathBuf::from(name);
        if direct.extension().is_some() && direct.exists() {
            return direct;
        }

        let candidates = [
            self.pipelines_dir.join(format!("{}.yaml", name)),
            PathBuf::from(format!("{}.yaml", name)),
        ];
        candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .unwrap_or_else(|| self.pipelines_dir.join(format!("{}.yaml", name)))
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a config file (if any) with the environment override and defaults
fn resolve(config_file: Option<PathBuf>, env_home: Option<PathBuf>) -> Result<ResolvedConfig> {
    let default_home = || -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR))
    };

    let Some(config_path) = config_file else {
        let home = match env_home {
            Some(home) => home,
            None => default_home()?,
        };
        return Ok(ResolvedConfig {
            home,
            pipelines_dir: PathBuf::from("pipelines"),
            config_file: None,
            shell: ShellSettings::default(),
            provisioner: ProvisionerSettings::default(),
        });
    };

    let config = load_config_file(&config_path)?;

    let promote_dir = config_path.parent().unwrap_or(Path::new("."));
    let base_dir = promote_dir.parent().unwrap_or(Path::new("."));

    let home = match (env_home, &config.paths.home) {
        (Some(home), _) => home,
        (None, Some(home)) => resolve_path(promote_dir, home),
        (None, None) => default_home()?,
    };

    let pipelines_dir = config
        .paths
        .pipelines
        .as_deref()
        .map(|p| resolve_path(base_dir, p))
        .unwrap_or_else(|| base_dir.join("pipelines"));

    let defaults = ShellSettings::default();
    let shell = match config.shell {
        Some(shell) => ShellSettings {
            program: shell.program.unwrap_or(defaults.program),
            working_dir: shell.working_dir.map(|d| resolve_path(base_dir, &d)),
            timeout_seconds: shell.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        },
        None => defaults,
    };

    Ok(ResolvedConfig {
        home,
        pipelines_dir,
        config_file: Some(config_path),
        shell,
        provisioner: config.provisioner.unwrap_or_default(),
    })
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let env_home = std::env::var(HOME_ENV).ok().map(PathBuf::from);
    resolve(find_config_file(&cwd), env_home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(root: &Path, yaml: &str) -> PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, Some(PathBuf::from("/tmp/promote-home"))).unwrap();

        assert_eq!(config.home, PathBuf::from("/tmp/promote-home"));
        assert_eq!(config.runs_dir(), PathBuf::from("/tmp/promote-home/runs"));
        assert_eq!(config.shell, ShellSettings::default());
        assert_eq!(config.shell.timeout_seconds, 1800);
        assert_eq!(config.provisioner.mode, ProvisionerMode::Command);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
version: "1"
paths:
  home: ./state
shell:
  program: bash
  timeout_seconds: 60
provisioner:
  mode: dry_run
  commands:
    data_store: deploy-db {unit}
"#,
        );

        let config = resolve(Some(path.clone()), None).unwrap();
        assert_eq!(config.home, temp.path().join(CONFIG_DIR).join("state"));
        assert_eq!(config.pipelines_dir, temp.path().join("pipelines"));
        assert_eq!(config.shell.program, "bash");
        assert_eq!(config.shell.timeout_seconds, 60);
        assert_eq!(config.provisioner.mode, ProvisionerMode::DryRun);
        assert_eq!(
            config.provisioner.commands.get(&UnitKind::DataStore).map(String::as_str),
            Some("deploy-db {unit}")
        );
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_env_home_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "paths:\n  home: ./state\n");

        let config = resolve(Some(path), Some(PathBuf::from("/srv/promote"))).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/promote"));
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "version: \"1\"\n");
        let nested = temp.path().join("services").join("api");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(&base, "./missing"),
            PathBuf::from("/home/user/project/./missing")
        );
    }
}
