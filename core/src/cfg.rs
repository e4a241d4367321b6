use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Identifier used to compute per-app configuration directories.
#[derive(Clone, Copy)]
pub struct AppId {
    /// Reverse-DNS style qualifier, e.g. `"com"`.
    pub qualifier: &'static str,
    /// Organization or vendor name, e.g. `"local"`.
    pub organization: &'static str,
    /// Application name, e.g. `"portal"`.
    pub application: &'static str,
}

/// Application configuration persisted to `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tracing level to use if `RUST_LOG` is not set (e.g. `"info"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prefix for the device's own topics, e.g. `"/pyportal"`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Broker address and credentials.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Fixed external topics the device listens on.
    #[serde(default)]
    pub topics: ExternalTopics,
    /// Hardware watchdog settings.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Periods of the built-in jobs.
    #[serde(default)]
    pub jobs: JobPeriods,
    /// Main loop timing and recovery thresholds.
    #[serde(default)]
    pub looping: LoopConfig,
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// User name; empty means anonymous.
    pub username: String,
    /// Password; empty means none.
    pub password: String,
}

/// Topics published by other systems that the device renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalTopics {
    /// Raw weather payload.
    pub weather: String,
    /// Local time sync payload.
    pub local_time: String,
    /// Inside temperature sensor feed.
    pub inside_temperature: String,
}

/// Watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Arm the watchdog at startup.
    pub enabled: bool,
    /// Seconds without a feed before the device is reset.
    pub timeout_secs: u64,
}

/// Job periods, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPeriods {
    /// Local time refresh.
    pub localtime: f64,
    /// Weather refresh.
    pub weather: f64,
    /// Clock redraw.
    pub update_time: f64,
    /// Status publish.
    pub send_status: f64,
    /// Board LED blink.
    pub led_blink: f64,
    /// Delay before a job that hit a recoverable fault is retried.
    pub retry_delay: f64,
}

/// Main loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Upper bound for one bus service tick (ms).
    pub service_timeout_ms: u64,
    /// Idle pause when a service tick did no work (ms).
    pub idle_ms: u64,
    /// Consecutive service failures tolerated before reconnecting.
    pub failure_threshold: u32,
    /// Pause before the reconnection protocol starts (s).
    pub reconnect_pause_secs: u64,
    /// Grace period before a fatal restart (s).
    pub fatal_delay_secs: u64,
}

fn default_log_level() -> String { "info".to_string() }
fn default_topic_prefix() -> String { "/pyportal".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            topic_prefix: default_topic_prefix(),
            broker: BrokerConfig::default(),
            topics: ExternalTopics::default(),
            watchdog: WatchdogConfig::default(),
            jobs: JobPeriods::default(),
            looping: LoopConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "pyportal".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for ExternalTopics {
    fn default() -> Self {
        Self {
            weather: "/openweather/raw".to_string(),
            local_time: "/aio/local_time".to_string(),
            inside_temperature: "/sensor/temperature_house".to_string(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self { Self { enabled: true, timeout_secs: 15 } }
}

impl Default for JobPeriods {
    fn default() -> Self {
        Self {
            localtime: 3620.0,
            weather: 11.0 * 60.0,
            update_time: 16.0,
            send_status: 10.0 * 60.0,
            led_blink: 60.0,
            retry_delay: 10.0,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            service_timeout_ms: 500,
            idle_ms: 123,
            failure_threshold: 2,
            reconnect_pause_secs: 3,
            fatal_delay_secs: 120,
        }
    }
}

impl BrokerConfig {
    /// Credentials, or `None` when the user name is empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

impl LoopConfig {
    /// Service tick timeout as a `Duration`.
    pub fn service_timeout(&self) -> Duration { Duration::from_millis(self.service_timeout_ms) }
    /// Idle pause as a `Duration`.
    pub fn idle(&self) -> Duration { Duration::from_millis(self.idle_ms) }
    /// Reconnect pause as a `Duration`.
    pub fn reconnect_pause(&self) -> Duration { Duration::from_secs(self.reconnect_pause_secs) }
    /// Fatal restart delay as a `Duration`.
    pub fn fatal_delay(&self) -> Duration { Duration::from_secs(self.fatal_delay_secs) }
}

impl Config {
    /// `<prefix>/<suffix>` for the device's own topics.
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_prefix.trim_end_matches('/'), suffix)
    }

    /// Reject settings the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        let j = &self.jobs;
        for (name, secs) in [
            ("localtime", j.localtime),
            ("weather", j.weather),
            ("update_time", j.update_time),
            ("send_status", j.send_status),
            ("led_blink", j.led_blink),
            ("retry_delay", j.retry_delay),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                bail!("jobs.{name} must be a positive number of seconds, got {secs}");
            }
        }
        if self.watchdog.enabled && self.watchdog.timeout_secs == 0 {
            bail!("watchdog.timeout_secs must be > 0 when the watchdog is enabled");
        }
        Ok(())
    }
}

/// Return the configuration directory for this app, creating it if needed.
pub fn config_dir(app: &AppId) -> Result<PathBuf> {
    let pd = ProjectDirs::from(app.qualifier, app.organization, app.application)
        .ok_or_else(|| anyhow::anyhow!("failed to resolve ProjectDirs"))?;
    let dir = pd.config_dir().to_path_buf();
    fs::create_dir_all(&dir).with_context(|| format!("create config dir {}", dir.display()))?;
    Ok(dir)
}

/// Load `config.toml` from the app config dir or create a default one.
pub fn load_or_init(app: &AppId) -> Result<Config> {
    let dir = config_dir(app)?;
    load_from(&dir.join("config.toml"))
}

/// Load the config at `path`, writing the defaults there first if it is missing.
pub fn load_from(path: &Path) -> Result<Config> {
    let cfg = if path.exists() {
        let txt = fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        toml::from_str::<Config>(&txt)
            .with_context(|| format!("parse {}", path.display()))?
    } else {
        let cfg = Config::default();
        save_config(path, &cfg)?;
        info!("wrote default config to {}", path.display());
        cfg
    };
    cfg.validate().with_context(|| format!("validate {}", path.display()))?;
    debug!(broker = %cfg.broker.host, prefix = %cfg.topic_prefix, "config loaded from {}", path.display());
    Ok(cfg)
}

fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    let s = toml::to_string_pretty(cfg)?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_initialised_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(cfg.topic("status"), "/pyportal/status");

        let again = load_from(&path).unwrap();
        assert_eq!(again.jobs.send_status, 600.0);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "topic_prefix = \"/den/\"\n[broker]\nhost = \"mqtt.lan\"\nusername = \"me\"\n",
        )
        .unwrap();
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.broker.host, "mqtt.lan");
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(cfg.broker.credentials(), Some(("me", "")));
        assert_eq!(cfg.topic("ping"), "/den/ping");
        assert!(cfg.watchdog.enabled);
    }

    #[test]
    fn zero_period_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[jobs]\nweather = 0\n").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn anonymous_broker_has_no_credentials() {
        assert_eq!(BrokerConfig::default().credentials(), None);
    }
}
