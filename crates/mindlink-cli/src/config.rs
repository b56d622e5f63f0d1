//! Configuration file – reads/writes `~/.mindlink/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mindlink_runtime::BridgeConfig;
use mindlink_types::BridgeError;

/// Persisted operator configuration stored in `~/.mindlink/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Period between decision cycles in autonomous mode, milliseconds.
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,

    /// Upper bound on one sensor read, milliseconds.
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,

    /// Concurrent-safe actions allowed in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_actions: usize,

    #[serde(default = "default_position_epsilon")]
    pub position_epsilon_mm: f32,

    #[serde(default = "default_rotation_epsilon")]
    pub rotation_epsilon_deg: f32,

    /// Robot identifier reported by the simulated robot.
    #[serde(default = "default_robot_id")]
    pub robot_id: String,

    /// Multiplier on simulated motion durations; `0` completes instantly.
    #[serde(default = "default_sim_time_scale")]
    pub sim_time_scale: f32,
}

fn default_cycle_ms() -> u64 {
    100
}
fn default_snapshot_timeout_ms() -> u64 {
    250
}
fn default_max_concurrent() -> usize {
    4
}
fn default_position_epsilon() -> f32 {
    1.0
}
fn default_rotation_epsilon() -> f32 {
    1.0
}
fn default_robot_id() -> String {
    "sim-01".to_string()
}
fn default_sim_time_scale() -> f32 {
    1.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cycle_ms: default_cycle_ms(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            max_concurrent_actions: default_max_concurrent(),
            position_epsilon_mm: default_position_epsilon(),
            rotation_epsilon_deg: default_rotation_epsilon(),
            robot_id: default_robot_id(),
            sim_time_scale: default_sim_time_scale(),
        }
    }
}

impl Config {
    /// The coordinator settings carried by this file.
    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            cycle_period: Duration::from_millis(self.cycle_ms.max(1)),
            snapshot_timeout: Duration::from_millis(self.snapshot_timeout_ms),
            max_concurrent_actions: self.max_concurrent_actions.max(1),
            position_epsilon_mm: self.position_epsilon_mm,
            rotation_epsilon_deg: self.rotation_epsilon_deg,
        }
    }
}

/// Return the path to `~/.mindlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mindlink").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("Failed to read config at {}: {}", path.display(), e)))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MINDLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MINDLINK_CYCLE_MS` | `cycle_ms` |
/// | `MINDLINK_SNAPSHOT_TIMEOUT_MS` | `snapshot_timeout_ms` |
/// | `MINDLINK_MAX_CONCURRENT` | `max_concurrent_actions` |
/// | `MINDLINK_SIM_TIME_SCALE` | `sim_time_scale` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MINDLINK_CYCLE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.cycle_ms = ms;
    }
    if let Ok(v) = std::env::var("MINDLINK_SNAPSHOT_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.snapshot_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("MINDLINK_MAX_CONCURRENT")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.max_concurrent_actions = n;
    }
    if let Ok(v) = std::env::var("MINDLINK_SIM_TIME_SCALE")
        && let Ok(scale) = v.parse::<f32>()
        && scale.is_finite()
    {
        cfg.sim_time_scale = scale;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Config(format!("Failed to create config directory: {}", e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| BridgeError::Config(format!("Failed to set config directory permissions: {}", e)))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| BridgeError::Config(format!("Failed to write config at {}: {}", path.display(), e)))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| BridgeError::Config(format!("Failed to write config at {}: {}", path.display(), e)))?;
    Ok(())
}
