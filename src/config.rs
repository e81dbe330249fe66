//! Runtime configuration.
//!
//! Read from `<config dir>/spikestream/spikestream.ini`, then overridden by
//! `SPIKESTREAM_*` environment variables. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use configparser::ini::Ini;
use tracing::{debug, info};
use url::Url;

use crate::adaptation::{AdaptationConfig, DEFAULT_COOLDOWN, MIN_BITRATE_BPS};
use crate::platform::DEFAULT_LIVE_BRIGHTNESS;
use crate::score_channel::transport::{
    ChannelOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECTION_ATTEMPTS, DEFAULT_RECONNECTION_DELAY,
    DEFAULT_SERVER_URL,
};
use crate::score_channel::LOW_BATTERY_THRESHOLD;
use crate::streaming::SessionConfig;

pub const ENV_SERVER_URL: &str = "SPIKESTREAM_SERVER_URL";
pub const ENV_COOLDOWN_MS: &str = "SPIKESTREAM_COOLDOWN_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub channel: ChannelOptions,
    pub adaptation: AdaptationConfig,
    pub live_brightness: f32,
    pub low_battery_threshold: u8,
}

impl CoreConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spikestream").join("spikestream.ini"))
    }

    /// Loads the default file if present and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!("[Config] {} not found, using defaults", path.display());
                Self::defaults()?
            }
            None => Self::defaults()?,
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn defaults() -> Result<Self> {
        Self::from_ini(&Ini::new())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        let location = path.to_str().context("Config path is not valid UTF-8")?;
        ini.load(location)
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        info!("[Config] Loaded {}", path.display());
        Self::from_ini(&ini)
    }

    pub fn from_ini_str(text: &str) -> Result<Self> {
        let mut ini = Ini::new();
        ini.read(text.to_string())
            .map_err(|e| anyhow!("Failed to parse config: {}", e))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let server = ini
            .get("score_channel", "server_url")
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let server_url = parse_server_url(&server, "score_channel.server_url")?;

        let mut channel = ChannelOptions::new(server_url);
        channel.reconnection_attempts = match read_uint(ini, "score_channel", "reconnection_attempts")? {
            Some(attempts) => u32::try_from(attempts)
                .map_err(|_| anyhow!("score_channel.reconnection_attempts is too large"))?,
            None => DEFAULT_RECONNECTION_ATTEMPTS,
        };
        channel.reconnection_delay = read_uint(ini, "score_channel", "reconnection_delay_ms")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECTION_DELAY);
        channel.connect_timeout = read_uint(ini, "score_channel", "connect_timeout_ms")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        let adaptation = AdaptationConfig {
            min_bitrate_bps: match read_uint(ini, "adaptation", "min_bitrate_bps")? {
                Some(bps) => u32::try_from(bps).map_err(|_| anyhow!("adaptation.min_bitrate_bps is too large"))?,
                None => MIN_BITRATE_BPS,
            },
            cooldown: read_uint(ini, "adaptation", "cooldown_ms")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_COOLDOWN),
        };

        let live_brightness = match ini
            .getfloat("session", "live_brightness")
            .map_err(|e| anyhow!("Invalid value for session.live_brightness: {}", e))?
        {
            Some(value) if (0.0..=1.0).contains(&value) => value as f32,
            Some(value) => bail!("session.live_brightness must be within 0..1, got {}", value),
            None => DEFAULT_LIVE_BRIGHTNESS,
        };

        let low_battery_threshold = match read_uint(ini, "session", "low_battery_threshold")? {
            Some(pct) if pct <= 100 => pct as u8,
            Some(pct) => bail!("session.low_battery_threshold must be a percentage, got {}", pct),
            None => LOW_BATTERY_THRESHOLD,
        };

        Ok(Self {
            channel,
            adaptation,
            live_brightness,
            low_battery_threshold,
        })
    }

    /// Applies `SPIKESTREAM_*` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(server) = lookup(ENV_SERVER_URL) {
            self.channel.server_url = parse_server_url(&server, ENV_SERVER_URL)?;
            debug!("[Config] Score server from environment: {}", self.channel.server_url);
        }
        if let Some(cooldown) = lookup(ENV_COOLDOWN_MS) {
            let millis: u64 = cooldown
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {:?}", ENV_COOLDOWN_MS, cooldown))?;
            self.adaptation.cooldown = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            adaptation: self.adaptation,
            ..SessionConfig::default()
        }
    }
}

fn read_uint(ini: &Ini, section: &str, key: &str) -> Result<Option<u64>> {
    ini.getuint(section, key)
        .map_err(|e| anyhow!("Invalid value for {}.{}: {}", section, key, e))
}

fn parse_server_url(value: &str, key: &str) -> Result<Url> {
    let url = Url::parse(value.trim()).with_context(|| format!("Invalid URL for {}: {:?}", key, value))?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => bail!("Unsupported scheme {:?} for {}", other, key),
    }
}
