//! Configuration resolution for fleetota.
//!
//! Implements layered config resolution:
//! 1. Built-in defaults
//! 2. TOML config file (every key optional)
//! 3. Environment variables (`FLEETOTA_*`)
//! 4. CLI arguments (applied by the binaries, highest priority)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::ReleaseId;

/// Name of the trusted-keys directory inside the storage root.
pub const KEYS_DIR_NAME: &str = "keys";

/// Update server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Release storage root; holds `{firmware}-{version}/` and `keys/`.
    pub storage_dir: PathBuf,
    /// Time an order stays pending without confirmation.
    pub order_ttl_secs: u64,
    /// Board ids allowed to report status and receive orders.
    pub known_boards: Vec<String>,
    pub max_upload_bytes: usize,
    pub log_level: String,
    pub test_mode: TestModeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            storage_dir: PathBuf::from("storage"),
            order_ttl_secs: 10 * 60,
            known_boards: Vec::new(),
            max_upload_bytes: 16 * 1024 * 1024, // 16 MB
            log_level: "info".to_string(),
            test_mode: TestModeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub const fn order_ttl(&self) -> Duration {
        Duration::from_secs(self.order_ttl_secs)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.storage_dir.join(KEYS_DIR_NAME)
    }
}

/// Integration-test switches. Disabled unless explicitly enabled, so a
/// production deployment never carries an authorization bypass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestModeConfig {
    pub enabled: bool,
    /// Board ids that authorize with `secret` and may act without an order.
    pub boards: Vec<String>,
    pub secret: String,
    /// Sentinel release that passes catalog checks without existing on disk.
    pub firmware: String,
    pub version: String,
}

impl Default for TestModeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            boards: vec!["-1".to_string()],
            secret: "test-secret".to_string(),
            firmware: "test".to_string(),
            version: "0.0.0".to_string(),
        }
    }
}

impl TestModeConfig {
    pub fn release(&self) -> ReleaseId {
        ReleaseId::new(self.firmware.clone(), self.version.clone())
    }
}

/// What the board agent does when a downloaded file fails verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Abort the install.
    #[default]
    Enforce,
    /// Log the mismatch and install anyway.
    Warn,
}

impl std::str::FromStr for ChecksumPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "enforce" => Ok(Self::Enforce),
            "warn" => Ok(Self::Warn),
            other => Err(Error::Config(format!("unknown checksum policy '{other}'"))),
        }
    }
}

/// Board agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub server_url: String,
    pub board_id: String,
    /// Release reported when the install directory has no release marker.
    pub firmware: String,
    pub version: String,
    /// Directory holding the board's executable files.
    pub install_dir: PathBuf,
    /// Scratch space for downloads; wiped before every attempt.
    pub staging_dir: PathBuf,
    /// Files in `install_dir` that an install must never touch.
    pub preserved_files: Vec<String>,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub checksum_policy: ChecksumPolicy,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            board_id: String::new(),
            firmware: "blinker".to_string(),
            version: "0.0.0".to_string(),
            install_dir: PathBuf::from("firmware"),
            staging_dir: PathBuf::from("staging"),
            preserved_files: vec!["secrets.toml".to_string()],
            poll_interval_secs: 10,
            request_timeout_secs: 30,
            checksum_policy: ChecksumPolicy::Enforce,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Load server configuration: defaults, then `path` (if any), then env.
pub fn load_server_config(path: Option<&Path>) -> Result<ServerConfig> {
    let mut config: ServerConfig = match path {
        Some(path) => load_config_file(path)?,
        None => ServerConfig::default(),
    };
    apply_server_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Load agent configuration: defaults, then `path` (if any), then env.
pub fn load_agent_config(path: Option<&Path>) -> Result<AgentConfig> {
    let mut config: AgentConfig = match path {
        Some(path) => load_config_file(path)?,
        None => AgentConfig::default(),
    };
    apply_agent_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

fn load_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.parse()
        .map_err(|_| Error::Config(format!("Invalid value for {key}: '{val}'")))
}

fn split_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply `FLEETOTA_*` overrides. `lookup` abstracts the environment so the
/// mapping can be tested without mutating process state.
pub fn apply_server_env<F>(config: &mut ServerConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("FLEETOTA_LISTEN_ADDR") {
        config.listen_addr = parse_env("FLEETOTA_LISTEN_ADDR", &val)?;
    }
    if let Some(val) = lookup("FLEETOTA_STORAGE_DIR") {
        config.storage_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("FLEETOTA_ORDER_TTL_MINUTES") {
        let minutes: u64 = parse_env("FLEETOTA_ORDER_TTL_MINUTES", &val)?;
        config.order_ttl_secs = minutes * 60;
    }
    if let Some(val) = lookup("FLEETOTA_ORDER_TTL_SECS") {
        config.order_ttl_secs = parse_env("FLEETOTA_ORDER_TTL_SECS", &val)?;
    }
    if let Some(val) = lookup("FLEETOTA_KNOWN_BOARDS") {
        config.known_boards = split_list(&val);
    }
    if let Some(val) = lookup("FLEETOTA_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = lookup("FLEETOTA_TEST_MODE") {
        config.test_mode.enabled = parse_env("FLEETOTA_TEST_MODE", &val)?;
    }
    Ok(())
}

/// Agent counterpart of [`apply_server_env`].
pub fn apply_agent_env<F>(config: &mut AgentConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("FLEETOTA_SERVER_URL") {
        config.server_url = val;
    }
    if let Some(val) = lookup("FLEETOTA_BOARD_ID") {
        config.board_id = val;
    }
    if let Some(val) = lookup("FLEETOTA_INSTALL_DIR") {
        config.install_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("FLEETOTA_STAGING_DIR") {
        config.staging_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("FLEETOTA_POLL_INTERVAL_SECS") {
        config.poll_interval_secs = parse_env("FLEETOTA_POLL_INTERVAL_SECS", &val)?;
    }
    if let Some(val) = lookup("FLEETOTA_CHECKSUM_POLICY") {
        config.checksum_policy = val.parse()?;
    }
    if let Some(val) = lookup("FLEETOTA_LOG_LEVEL") {
        config.log_level = val;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_server_config_has_10_minute_ttl() {
        let config = ServerConfig::default();
        assert_eq!(config.order_ttl(), Duration::from_secs(600));
        assert!(!config.test_mode.enabled);
        assert_eq!(config.keys_dir(), PathBuf::from("storage/keys"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
known_boards = ["b1", "b2"]

[test_mode]
enabled = true
"#,
        )
        .unwrap();

        let config: ServerConfig = load_config_file(&path).unwrap();
        assert_eq!(config.known_boards, vec!["b1", "b2"]);
        assert!(config.test_mode.enabled);
        assert_eq!(config.test_mode.secret, "test-secret");
        assert_eq!(config.order_ttl_secs, 600);
    }

    #[test]
    fn env_overrides_server_config() {
        let mut config = ServerConfig::default();
        apply_server_env(
            &mut config,
            env(&[
                ("FLEETOTA_ORDER_TTL_MINUTES", "5"),
                ("FLEETOTA_KNOWN_BOARDS", "b1, b2,,b3"),
                ("FLEETOTA_TEST_MODE", "true"),
            ]),
        )
        .unwrap();
        assert_eq!(config.order_ttl_secs, 300);
        assert_eq!(config.known_boards, vec!["b1", "b2", "b3"]);
        assert!(config.test_mode.enabled);
    }

    #[test]
    fn seconds_win_over_minutes() {
        let mut config = ServerConfig::default();
        apply_server_env(
            &mut config,
            env(&[
                ("FLEETOTA_ORDER_TTL_MINUTES", "5"),
                ("FLEETOTA_ORDER_TTL_SECS", "42"),
            ]),
        )
        .unwrap();
        assert_eq!(config.order_ttl_secs, 42);
    }

    #[test]
    fn invalid_env_value_is_an_error() {
        let mut config = ServerConfig::default();
        let err = apply_server_env(&mut config, env(&[("FLEETOTA_ORDER_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn agent_checksum_policy_from_env() {
        let mut config = AgentConfig::default();
        assert_eq!(config.checksum_policy, ChecksumPolicy::Enforce);
        apply_agent_env(&mut config, env(&[("FLEETOTA_CHECKSUM_POLICY", "WARN")])).unwrap();
        assert_eq!(config.checksum_policy, ChecksumPolicy::Warn);
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let err = load_server_config(Some(Path::new("/nonexistent/fleetota.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
