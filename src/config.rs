//! Configuration for the cell.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CINCHSEAL_CONTROLLER, CINCHSEAL_PLAN)
//! 2. Config file (.cinchseal/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .cinchseal/config.yaml
//! - Falls back to ~/.cinchseal/config.yaml
//! - The plan path is relative to the directory holding .cinchseal/

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::Timing;
use crate::domain::LineMap;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".cinchseal";
const DEFAULT_PLAN: &str = "plans/cinchseal.yaml";

/// Upper bound on the cooperative wait slice
const MAX_GATE_POLL_MS: u64 = 100;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub lines: LineMap,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Plan file (relative to the project root)
    pub plan: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "192.168.1.213".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub interlock_poll_ms: u64,
    pub gate_poll_ms: u64,
    pub heartbeat_period_ms: u64,
    pub settle_ms: u64,
    pub edge_queue_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            interlock_poll_ms: 10,
            gate_poll_ms: 100,
            heartbeat_period_ms: 1000,
            settle_ms: 100,
            edge_queue_capacity: 64,
        }
    }
}

impl TimingConfig {
    fn to_timing(&self) -> Result<Timing> {
        if self.interlock_poll_ms == 0 {
            anyhow::bail!("timing.interlock_poll_ms must be positive");
        }
        if self.gate_poll_ms == 0 || self.gate_poll_ms > MAX_GATE_POLL_MS {
            anyhow::bail!(
                "timing.gate_poll_ms must be between 1 and {}, got {}",
                MAX_GATE_POLL_MS,
                self.gate_poll_ms
            );
        }
        if self.heartbeat_period_ms == 0 {
            anyhow::bail!("timing.heartbeat_period_ms must be positive");
        }
        if self.edge_queue_capacity == 0 {
            anyhow::bail!("timing.edge_queue_capacity must be positive");
        }

        Ok(Timing {
            interlock_poll: Duration::from_millis(self.interlock_poll_ms),
            gate_poll: Duration::from_millis(self.gate_poll_ms),
            heartbeat_period: Duration::from_millis(self.heartbeat_period_ms),
            settle: Duration::from_millis(self.settle_ms),
            edge_queue_capacity: self.edge_queue_capacity,
        })
    }
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Controller network address
    pub controller_address: String,
    /// Line numbers per role
    pub lines: LineMap,
    /// Polling and wait intervals
    pub timing: Timing,
    /// Absolute or cwd-relative path to the plan file
    pub plan: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home = dirs::home_dir()?.join(CONFIG_DIR).join("config.yaml");
    home.exists().then_some(home)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
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

/// Combine a parsed file with environment overrides
fn resolve(file: ConfigFile, config_file: Option<PathBuf>) -> Result<ResolvedConfig> {
    file.lines
        .validate()
        .context("Invalid line assignment in config")?;
    let timing = file.timing.to_timing()?;

    let controller_address = std::env::var("CINCHSEAL_CONTROLLER")
        .unwrap_or_else(|_| file.controller.address.clone());

    let plan = if let Ok(env_plan) = std::env::var("CINCHSEAL_PLAN") {
        PathBuf::from(env_plan)
    } else {
        let plan_str = file.plan.as_deref().unwrap_or(DEFAULT_PLAN);
        match &config_file {
            // Project root is the parent of .cinchseal/
            Some(path) => {
                let base_dir = path
                    .parent()
                    .and_then(|p| p.parent())
                    .unwrap_or(Path::new("."));
                resolve_path(base_dir, plan_str)
            }
            None => PathBuf::from(plan_str),
        }
    };

    Ok(ResolvedConfig {
        controller_address,
        lines: file.lines,
        timing,
        plan,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            resolve(file, Some(path))
        }
        None => resolve(ConfigFile::default(), None),
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(ConfigFile::default(), None).unwrap();

        assert_eq!(config.lines, LineMap::default());
        assert_eq!(config.timing, Timing::default());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
controller:
  address: 10.0.0.5
lines:
  pause: 4
  indicator: 9
timing:
  gate_poll_ms: 50
plan: cell/plan.yaml
"#,
        );

        let file = load_config_file(&config_path).unwrap();
        assert_eq!(file.controller.address, "10.0.0.5");
        assert_eq!(file.lines.pause, 4);
        assert_eq!(file.lines.indicator, 9);
        // Unset lines keep their defaults
        assert_eq!(file.lines.reset, 2);
        assert_eq!(file.timing.gate_poll_ms, 50);
        assert_eq!(file.timing.interlock_poll_ms, 10);

        let resolved = resolve(file, Some(config_path)).unwrap();
        assert_eq!(resolved.timing.gate_poll, Duration::from_millis(50));
        assert!(resolved.plan.ends_with("cell/plan.yaml"));
        assert!(resolved.plan.starts_with(temp.path()));
    }

    #[test]
    fn test_slow_gate_poll_rejected() {
        let file = ConfigFile {
            timing: TimingConfig {
                gate_poll_ms: 250,
                ..TimingConfig::default()
            },
            ..ConfigFile::default()
        };

        let err = resolve(file, None).unwrap_err();
        assert!(err.to_string().contains("gate_poll_ms"));
    }

    #[test]
    fn test_line_conflict_rejected() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(&temp, "lines:\n  pause: 2\n");

        let file = load_config_file(&config_path).unwrap();
        assert!(resolve(file, Some(config_path)).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./plans/a.yaml"),
            PathBuf::from("/home/user/project/./plans/a.yaml")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/plan.yaml"),
            PathBuf::from("/absolute/plan.yaml")
        );
    }
}
