use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser::DevToolsEndpoint;
use crate::download::TransferOptions;
use crate::layout::EpisodeLayout;
use crate::locator::LocatorOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_navigation_retries")]
    pub navigation_retries: u32,
    #[serde(default = "default_marker_timeout_secs")]
    pub marker_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Only copy cookies scoped to these domains; empty copies all
    #[serde(default)]
    pub cookie_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocatorConfig {
    #[serde(default = "default_marker_selector")]
    pub marker_selector: String,
    #[serde(default = "default_source_label")]
    pub source_label: String,
    #[serde(default = "default_url_attribute")]
    pub url_attribute: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_send_referer")]
    pub send_referer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_chapter_folder_prefix")]
    pub chapter_folder_prefix: String,
    #[serde(default = "default_extension")]
    pub default_extension: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_debug_port() -> u16 {
    9222
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_navigation_timeout_secs() -> u64 {
    30
}
fn default_navigation_retries() -> u32 {
    2
}
fn default_marker_timeout_secs() -> u64 {
    10
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_marker_selector() -> String {
    "select.video-download-selector".to_string()
}
fn default_source_label() -> String {
    "source".to_string()
}
fn default_url_attribute() -> String {
    "value".to_string()
}
fn default_read_timeout_secs() -> u64 {
    300
}
fn default_user_agent() -> String {
    concat!("coursedl/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_send_referer() -> bool {
    true
}
fn default_chapter_folder_prefix() -> String {
    "Chapter".to_string()
}
fn default_extension() -> String {
    "mp4".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            debug_port: default_debug_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            navigation_retries: default_navigation_retries(),
            marker_timeout_secs: default_marker_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            cookie_domains: Vec::new(),
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            marker_selector: default_marker_selector(),
            source_label: default_source_label(),
            url_attribute: default_url_attribute(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            user_agent: default_user_agent(),
            send_referer: default_send_referer(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            chapter_folder_prefix: default_chapter_folder_prefix(),
            default_extension: default_extension(),
        }
    }
}

impl Config {
    /// DevTools endpoint, optionally on a port other than the configured one.
    pub fn endpoint(&self, port_override: Option<u16>) -> DevToolsEndpoint {
        DevToolsEndpoint::new(
            self.browser.host.clone(),
            port_override.unwrap_or(self.browser.debug_port),
        )
        .with_timeouts(
            Duration::from_secs(self.browser.connect_timeout_secs),
            Duration::from_secs(self.browser.navigation_timeout_secs),
        )
    }

    pub fn locator_options(&self) -> LocatorOptions {
        LocatorOptions {
            marker_selector: self.locator.marker_selector.clone(),
            source_label: self.locator.source_label.clone(),
            url_attribute: self.locator.url_attribute.clone(),
            marker_timeout: Duration::from_secs(self.browser.marker_timeout_secs),
            poll_interval: Duration::from_millis(self.browser.poll_interval_ms),
            navigation_retries: self.browser.navigation_retries,
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            connect_timeout: Duration::from_secs(self.transfer.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.transfer.read_timeout_secs),
            user_agent: self.transfer.user_agent.clone(),
        }
    }

    pub fn layout(&self, root: impl Into<PathBuf>) -> EpisodeLayout {
        EpisodeLayout::new(root)
            .with_chapter_prefix(self.output.chapter_folder_prefix.clone())
            .with_default_extension(self.output.default_extension.clone())
    }

    /// Check for values that would make a run misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.browser.host.trim().is_empty() {
            anyhow::bail!("browser.host cannot be empty");
        }
        if self.browser.debug_port == 0 {
            anyhow::bail!("browser.debug_port must be greater than 0");
        }
        if self.browser.connect_timeout_secs == 0 || self.browser.navigation_timeout_secs == 0 {
            anyhow::bail!("browser timeouts must be greater than 0");
        }
        if self.browser.marker_timeout_secs == 0 {
            anyhow::bail!("browser.marker_timeout_secs must be greater than 0");
        }
        if self.browser.poll_interval_ms == 0 {
            anyhow::bail!("browser.poll_interval_ms must be greater than 0");
        }
        if self.locator.marker_selector.trim().is_empty() {
            anyhow::bail!("locator.marker_selector cannot be empty");
        }
        if self.locator.url_attribute.trim().is_empty() {
            anyhow::bail!("locator.url_attribute cannot be empty");
        }
        if self.transfer.connect_timeout_secs == 0 || self.transfer.read_timeout_secs == 0 {
            anyhow::bail!("transfer timeouts must be greater than 0");
        }
        let ext = &self.output.default_extension;
        if ext.trim_start_matches('.').is_empty() || ext.contains(['/', '\\']) {
            anyhow::bail!("output.default_extension '{}' is not a valid extension", ext);
        }
        if self.output.chapter_folder_prefix.contains(['/', '\\']) {
            anyhow::bail!("output.chapter_folder_prefix cannot contain path separators");
        }
        Ok(())
    }
}

pub struct ConfigManager {
    config_file: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Load the config from the platform config directory, creating a
    /// default file on first use.
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("", "", "coursedl").context("Failed to determine config directory")?;
        Self::with_file(project_dirs.config_dir().join("config.toml"))
    }

    /// Load (or create) the config at an explicit path.
    pub fn with_file(config_file: PathBuf) -> Result<Self> {
        if let Some(config_dir) = config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !config_dir.exists() {
                fs::create_dir_all(config_dir).with_context(|| {
                    format!("Failed to create config directory: {:?}", config_dir)
                })?;
            }
        }

        let config = if config_file.exists() {
            Self::load_config(&config_file)?
        } else {
            let default_config = Config::default();
            Self::save_config(&config_file, &default_config)?;
            default_config
        };

        Ok(Self {
            config_file,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_file, &self.config)
    }

    /// Replace the config with defaults and write it out.
    pub fn reset(&mut self) -> Result<()> {
        self.config = Config::default();
        self.save()
    }

    pub fn validate(&self) -> Result<()> {
        self.config.validate()
    }

    /// Write a default config next to the active one for reference.
    pub fn create_sample_config(&self) -> Result<PathBuf> {
        let sample_file = self.config_file.with_file_name("config.sample.toml");
        Self::save_config(&sample_file, &Config::default())?;
        Ok(sample_file)
    }

    fn load_config(config_file: &Path) -> Result<Config> {
        let content = fs::read_to_string(config_file)
            .with_context(|| format!("Failed to read config file: {:?}", config_file))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_file))?;

        Ok(config)
    }

    fn save_config(config_file: &Path, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(config_file, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

        Ok(())
    }
}
