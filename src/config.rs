use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Body size limit for POST handlers (1 MiB).
pub const MAX_BODY_SIZE: usize = 1 << 20;

/// Default config file content written by `pinchtab config init`.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"{
  "port": 9867,
  "cdpUrl": "",
  "token": "",
  "headless": false,
  "noRestore": false,
  "noAnimations": false,
  "actionTimeoutMs": 15000,
  "navigateTimeoutMs": 30000,
  "chromeFlags": ""
}
"#;

/// Optional overrides parsed from `config.json`. All fields optional;
/// unknown fields are tolerated.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigFile {
    pub port: Option<u16>,
    pub cdp_url: Option<String>,
    pub token: Option<String>,
    pub state_dir: Option<String>,
    pub profile: Option<String>,
    pub headless: Option<bool>,
    pub no_restore: Option<bool>,
    pub no_animations: Option<bool>,
    pub action_timeout_ms: Option<u64>,
    pub navigate_timeout_ms: Option<u64>,
    pub chrome_binary: Option<String>,
    pub chrome_flags: Option<String>,
}

/// Fully resolved, immutable runtime configuration.
///
/// Constructed once at startup and shared by reference; components never
/// read process environment after this point.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub port: u16,
    /// Existing browser endpoint; empty means launch Chrome ourselves.
    pub cdp_url: String,
    /// Bearer token for the HTTP API; empty disables auth.
    pub token: String,
    pub state_dir: PathBuf,
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub no_restore: bool,
    pub no_animations: bool,
    #[serde(serialize_with = "serialize_millis", rename = "actionTimeoutMs")]
    pub action_timeout: Duration,
    #[serde(serialize_with = "serialize_millis", rename = "navigateTimeoutMs")]
    pub navigate_timeout: Duration,
    #[serde(serialize_with = "serialize_millis", rename = "shutdownTimeoutMs")]
    pub shutdown_timeout: Duration,
    pub chrome_binary: Option<String>,
    pub chrome_flags: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref, clippy::cast_possible_truncation)]
fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Config {
    /// Interval between stale-tab reaper ticks: 30 × the action timeout
    /// (7.5 minutes at defaults).
    #[must_use]
    pub fn reaper_interval(&self) -> Duration {
        self.action_timeout * 30
    }

    /// Load configuration from the process environment and the config
    /// file (`BRIDGE_CONFIG` or `~/.pinchtab/config.json`).
    ///
    /// Environment variables win over file keys; file keys win over
    /// defaults.
    #[must_use]
    pub fn load() -> Self {
        let config_path = config_file_path(std::env::var("BRIDGE_CONFIG").ok().as_deref());
        let file = config_path
            .as_deref()
            .and_then(read_config_file)
            .unwrap_or_default();
        Self::resolve(&file, |key| std::env::var(key).ok())
    }

    /// Resolve a `Config` from a parsed file and an environment lookup.
    ///
    /// The lookup is a parameter so tests can resolve without touching
    /// the process environment.
    pub fn resolve(file: &ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let default_state_dir = home.join(".pinchtab");

        let state_dir = env("BRIDGE_STATE_DIR")
            .or_else(|| file.state_dir.clone())
            .map_or(default_state_dir, PathBuf::from);

        let profile_dir = env("BRIDGE_PROFILE")
            .or_else(|| file.profile.clone())
            .map_or_else(|| state_dir.join("chrome-profile"), PathBuf::from);

        let port = env("BRIDGE_PORT")
            .and_then(|v| v.parse().ok())
            .or(file.port)
            .unwrap_or(9867);

        let action_timeout_ms = env("BRIDGE_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .or(file.action_timeout_ms)
            .unwrap_or(15_000);

        let navigate_timeout_ms = env("BRIDGE_NAV_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .or(file.navigate_timeout_ms)
            .unwrap_or(30_000);

        let chrome_flags = env("CHROME_FLAGS")
            .or_else(|| file.chrome_flags.clone())
            .unwrap_or_default();

        Self {
            port,
            cdp_url: env("CDP_URL").or_else(|| file.cdp_url.clone()).unwrap_or_default(),
            token: env("BRIDGE_TOKEN").or_else(|| file.token.clone()).unwrap_or_default(),
            state_dir,
            profile_dir,
            headless: env_bool(&env, "BRIDGE_HEADLESS").or(file.headless).unwrap_or(false),
            no_restore: env_bool(&env, "BRIDGE_NO_RESTORE")
                .or(file.no_restore)
                .unwrap_or(false),
            no_animations: env_bool(&env, "BRIDGE_NO_ANIMATIONS")
                .or(file.no_animations)
                .unwrap_or(false),
            action_timeout: Duration::from_millis(action_timeout_ms),
            navigate_timeout: Duration::from_millis(navigate_timeout_ms),
            shutdown_timeout: Duration::from_secs(10),
            chrome_binary: env("CHROME_BINARY").or_else(|| file.chrome_binary.clone()),
            chrome_flags: chrome_flags.split_whitespace().map(String::from).collect(),
        }
    }
}

fn env_bool(env: impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| v == "true" || v == "1")
}

/// The config file location: `BRIDGE_CONFIG` if set, otherwise
/// `~/.pinchtab/config.json`.
#[must_use]
pub fn config_file_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(PathBuf::from(p));
    }
    dirs::home_dir().map(|home| home.join(".pinchtab").join("config.json"))
}

fn read_config_file(path: &Path) -> Option<ConfigFile> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config file");
            None
        }
    }
}

/// Errors from `config init`.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    AlreadyExists(PathBuf),
    NoHomeDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config file error: {e}"),
            Self::AlreadyExists(p) => {
                write!(f, "config file already exists: {}", p.display())
            }
            Self::NoHomeDir => write!(f, "could not determine home directory"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Write the default config template to the config file path.
///
/// # Errors
///
/// Returns `ConfigError::AlreadyExists` if a config file is present.
pub fn init_config_file(explicit: Option<&str>) -> Result<PathBuf, ConfigError> {
    let path = config_file_path(explicit).ok_or(ConfigError::NoHomeDir)?;
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::resolve(&ConfigFile::default(), no_env);
        assert_eq!(config.port, 9867);
        assert!(config.cdp_url.is_empty());
        assert!(config.token.is_empty());
        assert!(!config.headless);
        assert_eq!(config.action_timeout, Duration::from_secs(15));
        assert_eq!(config.navigate_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert!(config.state_dir.ends_with(".pinchtab"));
        assert!(config.profile_dir.ends_with("chrome-profile"));
    }

    #[test]
    fn env_wins_over_file() {
        let file = ConfigFile {
            port: Some(7000),
            headless: Some(false),
            ..ConfigFile::default()
        };
        let env: HashMap<&str, &str> =
            HashMap::from([("BRIDGE_PORT", "8000"), ("BRIDGE_HEADLESS", "true")]);
        let config = Config::resolve(&file, |k| env.get(k).map(ToString::to_string));
        assert_eq!(config.port, 8000);
        assert!(config.headless);
    }

    #[test]
    fn file_wins_over_defaults() {
        let file = ConfigFile {
            port: Some(7000),
            action_timeout_ms: Some(5000),
            token: Some("secret".into()),
            ..ConfigFile::default()
        };
        let config = Config::resolve(&file, no_env);
        assert_eq!(config.port, 7000);
        assert_eq!(config.action_timeout, Duration::from_secs(5));
        assert_eq!(config.token, "secret");
    }

    #[test]
    fn chrome_flags_split_on_whitespace() {
        let env: HashMap<&str, &str> =
            HashMap::from([("CHROME_FLAGS", "--disable-gpu  --lang=en-US")]);
        let config = Config::resolve(&ConfigFile::default(), |k| {
            env.get(k).map(ToString::to_string)
        });
        assert_eq!(config.chrome_flags, vec!["--disable-gpu", "--lang=en-US"]);
    }

    #[test]
    fn reaper_interval_is_thirty_times_action_timeout() {
        let config = Config::resolve(&ConfigFile::default(), no_env);
        assert_eq!(config.reaper_interval(), Duration::from_secs(450));
    }

    #[test]
    fn invalid_env_number_falls_through() {
        let file = ConfigFile {
            port: Some(7000),
            ..ConfigFile::default()
        };
        let env: HashMap<&str, &str> = HashMap::from([("BRIDGE_PORT", "not-a-port")]);
        let config = Config::resolve(&file, |k| env.get(k).map(ToString::to_string));
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn config_file_tolerates_unknown_fields() {
        let parsed: ConfigFile =
            serde_json::from_str(r#"{"port": 9000, "futureKnob": true}"#).unwrap();
        assert_eq!(parsed.port, Some(9000));
    }

    #[test]
    fn default_template_parses_as_config_file() {
        let parsed: ConfigFile = serde_json::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(parsed.port, Some(9867));
        assert_eq!(parsed.action_timeout_ms, Some(15_000));
    }

    #[test]
    fn explicit_config_path_is_used() {
        let path = config_file_path(Some("/tmp/custom-pinchtab.json")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom-pinchtab.json"));
    }
}
