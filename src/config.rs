use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverters: Vec<Inverter>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append decoded banks to, one JSON object per line
    pub datalog_file: Option<String>,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Inverter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "de_serial")]
    pub serial: Option<Serial>,
    #[serde(default, deserialize_with = "de_serial")]
    pub datalog: Option<Serial>,

    pub respond_to_heartbeat: Option<bool>,
    pub use_tcp_nodelay: Option<bool>,

    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "poll_interval_ms")]
    pub poll_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "delay_ms")]
    pub delay: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "response_timeout_ms")]
    pub response_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "reconnect_delay_ms")]
    pub reconnect_delay: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "connect_timeout_ms")]
    pub connect_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "online_threshold_ms")]
    pub online_threshold: Option<Duration>,
}

impl Inverter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn serial(&self) -> Option<Serial> {
        self.serial
    }

    pub fn datalog(&self) -> Option<Serial> {
        self.datalog
    }

    pub fn respond_to_heartbeat(&self) -> bool {
        self.respond_to_heartbeat.unwrap_or(true)
    }

    pub fn use_tcp_nodelay(&self) -> bool {
        self.use_tcp_nodelay.unwrap_or(true)
    }

    /// How often the session is ticked.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(Duration::from_millis(250))
    }

    /// Minimum spacing between two requests.
    pub fn delay(&self) -> Duration {
        self.delay.unwrap_or(Duration::from_millis(1000))
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout.unwrap_or(Duration::from_secs(5))
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay.unwrap_or(Duration::from_secs(5))
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(Duration::from_secs(10))
    }

    /// Heartbeats or data within this window count as online.
    pub fn online_threshold(&self) -> Duration {
        self.online_threshold.unwrap_or(Duration::from_secs(90))
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content).map_err(|err| file_error!("{}: {}", file, err))
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!(
            "  Inverters: {} configured, {} enabled",
            self.inverters.len(),
            self.inverters.iter().filter(|i| i.enabled).count()
        );
        for (i, inv) in self.inverters.iter().enumerate() {
            info!("    Inverter[{}]:", i);
            info!("      Enabled: {}", inv.enabled);
            info!("      Host: {}:{}", inv.host, inv.port);
            info!("      Serial: {}", inv.serial.map(|s| s.to_string()).unwrap_or_default());
            info!("      Datalog: {}", inv.datalog.map(|s| s.to_string()).unwrap_or_default());
            info!("      Request spacing: {}ms", inv.delay().as_millis());
            info!("      Response timeout: {}ms", inv.response_timeout().as_millis());
            info!("      TCP NoDelay: {}", inv.use_tcp_nodelay());
        }
        info!(
            "  Datalog file: {}",
            self.datalog_file.as_deref().unwrap_or("disabled")
        );
        info!("  Log Level: {}", self.loglevel);
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn enabled_inverters(&self) -> impl Iterator<Item = &Inverter> {
        self.inverters.iter().filter(|i| i.enabled())
    }

    fn validate(&self) -> Result<()> {
        for (i, inv) in self.inverters.iter().enumerate() {
            if !inv.enabled {
                continue;
            }
            if inv.port == 0 {
                bail!("inverter[{}].port must be between 1 and 65535", i);
            }
            if inv.host.is_empty() {
                bail!("inverter[{}].host cannot be empty", i);
            }
            if inv.serial.is_none() {
                bail!("inverter[{}].serial must be set", i);
            }
            if inv.datalog.is_none() {
                bail!("inverter[{}].datalog must be set", i);
            }
            for (name, value) in [
                ("poll_interval_ms", inv.poll_interval()),
                ("delay_ms", inv.delay()),
                ("response_timeout_ms", inv.response_timeout()),
                ("reconnect_delay_ms", inv.reconnect_delay()),
                ("connect_timeout_ms", inv.connect_timeout()),
                ("online_threshold_ms", inv.online_threshold()),
            ] {
                if value.is_zero() {
                    bail!("inverter[{}].{} must be greater than 0", i, name);
                }
            }
        }

        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_port() -> u16 {
        8000
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

fn de_serial<'de, D>(deserializer: D) -> Result<Option<Serial>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(None)
    } else {
        Serial::from_str(&s).map(Some).map_err(serde::de::Error::custom)
    }
}
