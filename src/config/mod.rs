use crate::control::ScreenshotSpec;
use crate::emotes::{ProviderEndpoints, DEFAULT_USER_AGENT};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "studio-bridge.toml";
const MANAGED_CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "StudioBridge";
const ENV_PREFIX: &str = "STUDIO_BRIDGE_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub obs: ObsConfig,
    pub reconnect: ReconnectConfig,
    pub screenshots: ScreenshotConfig,
    pub chat: ChatConfig,
    pub emotes: EmotesConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObsConfig {
    pub default_port: u16,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self { default_port: 4455 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 5000,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub width: u32,
    pub height: u32,
    /// 0..=100, or -1 for the encoder default.
    pub quality: i32,
    pub format: String,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1500,
            width: 320,
            height: 180,
            quality: 60,
            format: "jpeg".to_string(),
        }
    }
}

impl ScreenshotConfig {
    pub fn spec(&self) -> ScreenshotSpec {
        ScreenshotSpec {
            format: self.format.clone(),
            width: self.width,
            height: self.height,
            quality: self.quality,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatConfig {
    pub relay_url: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            relay_url: crate::chat::DEFAULT_RELAY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmotesConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub seventv_base: String,
    pub bttv_base: String,
    pub ffz_base: String,
    pub badges_base: String,
}

impl Default for EmotesConfig {
    fn default() -> Self {
        let endpoints = ProviderEndpoints::default();
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 15,
            seventv_base: endpoints.seventv,
            bttv_base: endpoints.bttv,
            ffz_base: endpoints.ffz,
            badges_base: endpoints.badges,
        }
    }
}

impl EmotesConfig {
    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            seventv: self.seventv_base.clone(),
            bttv: self.bttv_base.clone(),
            ffz: self.ffz_base.clone(),
            badges: self.badges_base.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            config = toml::from_str::<Config>(&raw)
                .map_err(|e| format!("{}: {e}", config_path.display()))?;
        }

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let var = |name: &str| env::var(format!("{}{}", ENV_PREFIX, name)).ok();

        if let Some(port) = var("OBS_DEFAULT_PORT").and_then(|v| v.parse().ok()) {
            self.obs.default_port = port;
        }

        if let Some(val) = var("RECONNECT_ENABLED") {
            self.reconnect.enabled = val.parse().unwrap_or(true);
        }
        if let Some(delay) = var("RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.reconnect.delay_ms = delay;
        }

        if let Some(val) = var("SCREENSHOTS_ENABLED") {
            self.screenshots.enabled = val.parse().unwrap_or(true);
        }
        if let Some(interval) = var("SCREENSHOT_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.screenshots.poll_interval_ms = interval;
        }

        if let Some(url) = var("CHAT_RELAY_URL") {
            self.chat.relay_url = url;
        }

        if let Some(ua) = var("EMOTES_USER_AGENT") {
            self.emotes.user_agent = ua;
        }
        if let Some(secs) = var("EMOTES_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.emotes.request_timeout_secs = secs;
        }

        if let Some(path) = var("STORE_PATH") {
            self.store.path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.obs.default_port == 0 {
            return Err("obs.default_port must be non-zero".into());
        }
        if self.reconnect.delay_ms < 100 {
            return Err("reconnect.delay_ms must be >= 100".into());
        }
        if self.screenshots.poll_interval_ms < 250 {
            return Err("screenshots.poll_interval_ms must be >= 250".into());
        }
        if self.screenshots.width == 0 || self.screenshots.height == 0 {
            return Err("screenshots.width and screenshots.height must be non-zero".into());
        }
        if !(self.screenshots.quality == -1 || (0..=100).contains(&self.screenshots.quality)) {
            return Err("screenshots.quality must be -1 or within 0..=100".into());
        }
        if self.screenshots.format.trim().is_empty() {
            return Err("screenshots.format must be set".into());
        }
        let relay = self.chat.relay_url.trim();
        if !(relay.starts_with("ws://") || relay.starts_with("wss://")) {
            return Err("chat.relay_url must be a ws:// or wss:// url".into());
        }
        if self.emotes.request_timeout_secs == 0 {
            return Err("emotes.request_timeout_secs must be non-zero".into());
        }
        for (key, base) in [
            ("emotes.seventv_base", &self.emotes.seventv_base),
            ("emotes.bttv_base", &self.emotes.bttv_base),
            ("emotes.ffz_base", &self.emotes.ffz_base),
            ("emotes.badges_base", &self.emotes.badges_base),
        ] {
            if base.trim().is_empty() {
                return Err(format!("{key} must be set").into());
            }
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err(format!("{} already exists", path.as_ref().display()).into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }

    /// Profile store location: explicit override or next to the managed config.
    pub fn store_path(&self) -> PathBuf {
        match self.store.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => crate::store::default_store_path(),
        }
    }
}

pub fn app_data_dir() -> PathBuf {
    let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
    Path::new(&appdata).join(APP_DIR)
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    app_data_dir().join(MANAGED_CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
