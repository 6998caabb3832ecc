//! Configuration resolution for portbridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (`--config`, or `portbridge.toml` in the working directory)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "portbridge.toml";

/// Literal the legacy port patch searches for.
pub const DEFAULT_PATCH_SEARCH: &str = "const PORT = process.env.PORT || 5000;";

/// Literal the legacy port patch writes in its place.
pub const DEFAULT_PATCH_REPLACE: &str = "const PORT = process.env.PORT || 3000;";

/// Complete portbridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub front_door: FrontDoorConfig,
    pub child: ChildConfig,
    pub log: LogConfig,
}

/// Front door (redirect server) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontDoorConfig {
    /// Address the redirect server binds to.
    pub listen_addr: SocketAddr,
    /// Host every redirect points at.
    pub target_host: String,
    /// Port the child application listens on.
    pub target_port: u16,
}

impl Default for FrontDoorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            target_host: "localhost".to_string(),
            target_port: 3000,
        }
    }
}

impl FrontDoorConfig {
    /// Base URL of the child application, without a trailing slash.
    pub fn target_base_url(&self) -> String {
        format!("http://{}:{}", self.target_host, self.target_port)
    }
}

/// Child process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildConfig {
    /// Executable to launch (looked up in `PATH` when not a path).
    pub program: String,
    /// Fixed argument list.
    pub args: Vec<String>,
    /// Working directory for the child and base for a relative patch file.
    pub working_dir: Option<PathBuf>,
    /// Environment variable that carries the target port into the child.
    /// `None` or an empty name disables injection.
    pub port_env: Option<String>,
    /// Seconds to wait after SIGTERM before SIGKILL on shutdown.
    pub terminate_timeout_secs: u64,
    pub patch: PatchConfig,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["app.js".to_string()],
            working_dir: None,
            port_env: Some("PORT".to_string()),
            terminate_timeout_secs: 5,
            patch: PatchConfig::default(),
        }
    }
}

impl ChildConfig {
    /// Patch file resolved against the working directory.
    pub fn patch_file(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) if self.patch.file.is_relative() => dir.join(&self.patch.file),
            _ => self.patch.file.clone(),
        }
    }
}

/// Legacy in-place port substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub enabled: bool,
    pub file: PathBuf,
    pub search: String,
    pub replace: String,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("app.js"),
            search: DEFAULT_PATCH_SEARCH.to_string(),
            replace: DEFAULT_PATCH_REPLACE.to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        if self.front_door.target_host.trim().is_empty() {
            return Err(Error::Config("front_door.target_host is empty".into()));
        }
        if self.front_door.target_port == 0 {
            return Err(Error::Config("front_door.target_port must be non-zero".into()));
        }
        if self.child.program.trim().is_empty() {
            return Err(Error::Config("child.program is empty".into()));
        }
        if self.child.patch.enabled && self.child.patch.search.is_empty() {
            return Err(Error::Config(
                "child.patch.search must not be empty when the patch is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist. Without one, `portbridge.toml` in the
/// working directory is used if present.
///
/// Environment values that fail to parse are skipped and returned so the
/// caller can report them once logging is up.
pub fn load_config(path: Option<&Path>) -> Result<(Config, Vec<RejectedOverride>)> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                load_config_file(fallback)?
            } else {
                Config::default()
            }
        }
    };

    let rejected = apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok((config, rejected))
}

/// Parse a TOML config file. Missing keys fall back to defaults.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_config(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Parse TOML config text.
pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// An environment override whose value could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedOverride {
    pub key: &'static str,
    pub value: String,
}

/// Apply `PORTBRIDGE_*` overrides using `lookup` to read variables.
///
/// Unparsable values leave the config untouched and are returned.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Vec<RejectedOverride>
where
    F: Fn(&str) -> Option<String>,
{
    let mut rejected = Vec::new();
    let mut reject = |key: &'static str, value: String| {
        rejected.push(RejectedOverride { key, value });
    };

    if let Some(val) = lookup("PORTBRIDGE_LISTEN_ADDR") {
        match val.parse() {
            Ok(addr) => config.front_door.listen_addr = addr,
            Err(_) => reject("PORTBRIDGE_LISTEN_ADDR", val),
        }
    }
    if let Some(val) = lookup("PORTBRIDGE_TARGET_HOST") {
        config.front_door.target_host = val;
    }
    if let Some(val) = lookup("PORTBRIDGE_TARGET_PORT") {
        match val.parse() {
            Ok(port) => config.front_door.target_port = port,
            Err(_) => reject("PORTBRIDGE_TARGET_PORT", val),
        }
    }
    if let Some(val) = lookup("PORTBRIDGE_CHILD_PROGRAM") {
        config.child.program = val;
    }
    if let Some(val) = lookup("PORTBRIDGE_PATCH_ENABLED") {
        match parse_bool(&val) {
            Some(enabled) => config.child.patch.enabled = enabled,
            None => reject("PORTBRIDGE_PATCH_ENABLED", val),
        }
    }
    if let Some(val) = lookup("PORTBRIDGE_LOG_LEVEL") {
        config.log.level = val;
    }
    if let Some(val) = lookup("PORTBRIDGE_LOG_JSON") {
        match parse_bool(&val) {
            Some(json) => config.log.json = json,
            None => reject("PORTBRIDGE_LOG_JSON", val),
        }
    }

    rejected
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_legacy_bridge() {
        let config = Config::default();
        assert_eq!(config.front_door.listen_addr.port(), 5000);
        assert_eq!(config.front_door.target_base_url(), "http://localhost:3000");
        assert_eq!(config.child.program, "node");
        assert_eq!(config.child.args, vec!["app.js".to_string()]);
        assert_eq!(config.child.port_env.as_deref(), Some("PORT"));
        assert!(config.child.patch.enabled);
        assert_eq!(config.child.patch.search, DEFAULT_PATCH_SEARCH);
        assert_eq!(config.child.patch.replace, DEFAULT_PATCH_REPLACE);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [front_door]
            target_port = 8080

            [child]
            program = "deno"
            args = ["run", "main.ts"]

            [child.patch]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.front_door.target_port, 8080);
        assert_eq!(config.front_door.target_host, "localhost");
        assert_eq!(config.child.program, "deno");
        assert_eq!(config.child.args.len(), 2);
        assert!(!config.child.patch.enabled);
        assert_eq!(config.child.patch.file, PathBuf::from("app.js"));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = parse_config("[front_door\nport = ").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn load_config_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portbridge.toml");
        std::fs::write(&path, "[log]\nlevel = \"debug\"\njson = true\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let rejected = apply_env_overrides(
            &mut config,
            env(&[
                ("PORTBRIDGE_LISTEN_ADDR", "127.0.0.1:8000"),
                ("PORTBRIDGE_TARGET_HOST", "127.0.0.1"),
                ("PORTBRIDGE_TARGET_PORT", "4000"),
                ("PORTBRIDGE_CHILD_PROGRAM", "bun"),
                ("PORTBRIDGE_PATCH_ENABLED", "off"),
                ("PORTBRIDGE_LOG_LEVEL", "trace"),
                ("PORTBRIDGE_LOG_JSON", "1"),
            ]),
        );
        assert_eq!(config.front_door.listen_addr, "127.0.0.1:8000".parse().unwrap());
        assert_eq!(config.front_door.target_base_url(), "http://127.0.0.1:4000");
        assert_eq!(config.child.program, "bun");
        assert!(!config.child.patch.enabled);
        assert_eq!(config.log.level, "trace");
        assert!(config.log.json);
        assert!(rejected.is_empty());
    }

    #[test]
    fn invalid_env_values_are_returned_and_ignored() {
        let mut config = Config::default();
        let rejected = apply_env_overrides(
            &mut config,
            env(&[
                ("PORTBRIDGE_LISTEN_ADDR", "localhost"),
                ("PORTBRIDGE_TARGET_PORT", "not-a-port"),
                ("PORTBRIDGE_PATCH_ENABLED", "maybe"),
                ("PORTBRIDGE_LOG_JSON", "2"),
            ]),
        );
        assert_eq!(config, Config::default());
        assert_eq!(
            rejected,
            vec![
                RejectedOverride {
                    key: "PORTBRIDGE_LISTEN_ADDR",
                    value: "localhost".to_string(),
                },
                RejectedOverride {
                    key: "PORTBRIDGE_TARGET_PORT",
                    value: "not-a-port".to_string(),
                },
                RejectedOverride {
                    key: "PORTBRIDGE_PATCH_ENABLED",
                    value: "maybe".to_string(),
                },
                RejectedOverride {
                    key: "PORTBRIDGE_LOG_JSON",
                    value: "2".to_string(),
                },
            ]
        );
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.front_door.target_port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.child.program = "  ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.child.patch.search.clear();
        assert!(config.validate().is_err());
        config.child.patch.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn patch_file_resolves_against_working_dir() {
        let mut child = ChildConfig::default();
        assert_eq!(child.patch_file(), PathBuf::from("app.js"));

        child.working_dir = Some(PathBuf::from("/srv/app"));
        assert_eq!(child.patch_file(), PathBuf::from("/srv/app/app.js"));

        child.patch.file = PathBuf::from("/etc/app.js");
        assert_eq!(child.patch_file(), PathBuf::from("/etc/app.js"));
    }
}
