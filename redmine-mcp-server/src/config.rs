//! Configuration management for the Redmine MCP Server
//!
//! Handles loading configuration from environment variables, TOML files,
//! and provides sensible defaults for all settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest page size Redmine offers in its list views
pub const MAX_PER_PAGE: u32 = 100;

/// Upper bound for every configured timeout (one week)
pub const MAX_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Main configuration structure for the Redmine MCP Server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedmineConfig {
    /// Redmine instance URL, without trailing slash
    pub base_url: String,

    /// Login name used by `redmine_login` when the caller passes none
    pub username: Option<String>,

    /// Password used by `redmine_login` when the caller passes none
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Pre-authenticated session cookie (`name=value`) for out-of-band login
    #[serde(skip_serializing)]
    pub session_cookie: Option<String>,

    /// HTTP request timeout in seconds (default: 30)
    pub request_timeout_seconds: u64,

    /// Idle session lifetime reported to callers (default: 3600)
    pub session_timeout_seconds: u64,

    /// How long login waits for the post-login marker (default: 60)
    pub login_wait_seconds: u64,

    /// How long field discovery waits for a tracker selection to apply (default: 10)
    pub field_discovery_timeout_seconds: u64,

    /// Interval between condition polls in milliseconds (default: 500)
    pub poll_interval_millis: u64,

    /// Page size for list views when the caller gives none (default: 25)
    pub default_per_page: u32,

    /// How tracker arguments are matched against the project's trackers
    pub tracker_match: TrackerMatch,

    /// User agent sent with every request
    pub user_agent: String,
}

/// Tracker matching policy for `search_issues` and `create_issue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackerMatch {
    /// Numeric tracker ID (the `<option value>`)
    #[default]
    Id,
    /// Display name as rendered in the tracker select, case-insensitive
    Name,
}

impl TrackerMatch {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "id" => Some(TrackerMatch::Id),
            "name" => Some(TrackerMatch::Name),
            _ => None,
        }
    }
}

impl Default for RedmineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            username: None,
            password: None,
            session_cookie: None,
            request_timeout_seconds: 30,
            session_timeout_seconds: 3600,
            login_wait_seconds: 60,
            field_discovery_timeout_seconds: 10,
            poll_interval_millis: 500,
            default_per_page: 25,
            tracker_match: TrackerMatch::Id,
            user_agent: default_user_agent(),
        }
    }
}

impl RedmineConfig {
    /// Load configuration from environment variables, TOML file, and defaults
    /// Priority: env vars > TOML file > defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(file_config) = Self::load_from_file("config/redmine-mcp-config.toml") {
            info!("Loaded configuration from TOML file");
            config = file_config;
        } else if let Ok(file_config) = Self::load_from_file("redmine-mcp-config.toml") {
            info!("Loaded configuration from TOML file in current directory");
            config = file_config;
        } else {
            debug!("No TOML configuration file found, using defaults and environment variables");
        }

        config.load_from_env()?;
        config.normalize();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load configuration from environment variables
    fn load_from_env(&mut self) -> Result<()> {
        if let Ok(url) = env::var("REDMINE_URL") {
            self.base_url = url;
            debug!("Loaded REDMINE_URL from environment");
        }

        if let Ok(username) = env::var("REDMINE_USERNAME") {
            self.username = Some(username);
            debug!("Loaded REDMINE_USERNAME from environment");
        }

        if let Ok(password) = env::var("REDMINE_PASSWORD") {
            self.password = Some(password);
        }

        if let Ok(cookie) = env::var("REDMINE_SESSION_COOKIE") {
            if !cookie.trim().is_empty() {
                self.session_cookie = Some(cookie);
                debug!("Loaded pre-authenticated session cookie from environment");
            }
        }

        if let Some(timeout) = parse_env::<u64>("REQUEST_TIMEOUT") {
            self.request_timeout_seconds = timeout;
            debug!("Set request timeout to {} seconds from environment", timeout);
        }

        if let Some(timeout) = parse_env::<u64>("SESSION_TIMEOUT") {
            self.session_timeout_seconds = timeout;
        }

        if let Some(wait) = parse_env::<u64>("REDMINE_LOGIN_WAIT") {
            self.login_wait_seconds = wait;
            debug!("Set login wait to {} seconds from environment", wait);
        }

        if let Some(wait) = parse_env::<u64>("REDMINE_FIELD_WAIT") {
            self.field_discovery_timeout_seconds = wait;
        }

        if let Some(interval) = parse_env::<u64>("REDMINE_POLL_INTERVAL_MS") {
            self.poll_interval_millis = interval;
        }

        if let Some(per_page) = parse_env::<u32>("REDMINE_PER_PAGE") {
            self.default_per_page = per_page.min(MAX_PER_PAGE);
            debug!("Set default page size to {} from environment", self.default_per_page);
        }

        if let Ok(mode) = env::var("REDMINE_TRACKER_MATCH") {
            match TrackerMatch::parse(&mode) {
                Some(parsed) => self.tracker_match = parsed,
                None => warn!("Unknown REDMINE_TRACKER_MATCH: {}, using default", mode),
            }
        }

        if let Ok(user_agent) = env::var("USER_AGENT") {
            self.user_agent = user_agent;
        }

        Ok(())
    }

    /// Strip surrounding whitespace and the trailing slash from the base URL
    pub fn normalize(&mut self) {
        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        self.base_url = trimmed;
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(anyhow::anyhow!(
                "Redmine URL is required. Set REDMINE_URL environment variable or configure in TOML file."
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "Redmine URL must start with http:// or https://. Got: {}",
                self.base_url
            ));
        }

        url::Url::parse(&self.base_url)
            .with_context(|| format!("Redmine URL is not a valid URL: {}", self.base_url))?;

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("request_timeout_seconds must be greater than 0"));
        }

        if self.login_wait_seconds == 0 || self.field_discovery_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("wait timeouts must be greater than 0"));
        }

        if self.session_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("session_timeout_seconds must be greater than 0"));
        }

        for (name, seconds) in [
            ("request_timeout_seconds", self.request_timeout_seconds),
            ("login_wait_seconds", self.login_wait_seconds),
            ("field_discovery_timeout_seconds", self.field_discovery_timeout_seconds),
            ("session_timeout_seconds", self.session_timeout_seconds),
        ] {
            if seconds > MAX_TIMEOUT_SECONDS {
                return Err(anyhow::anyhow!(
                    "{} must not exceed {} seconds",
                    name,
                    MAX_TIMEOUT_SECONDS
                ));
            }
        }

        if self.poll_interval_millis == 0 {
            return Err(anyhow::anyhow!("poll_interval_millis must be greater than 0"));
        }

        if self.default_per_page == 0 || self.default_per_page > MAX_PER_PAGE {
            return Err(anyhow::anyhow!(
                "default_per_page must be between 1 and {}",
                MAX_PER_PAGE
            ));
        }

        if self.username.is_some() != self.password.is_some() {
            warn!("Only one of REDMINE_USERNAME / REDMINE_PASSWORD is set; it will be ignored");
        }

        info!("Configuration validation successful");
        Ok(())
    }

    /// Login page URL
    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    /// Logout endpoint URL
    pub fn logout_url(&self) -> String {
        format!("{}/logout", self.base_url)
    }

    /// Project list URL, also the post-login landing page
    pub fn projects_url(&self) -> String {
        format!("{}/projects", self.base_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_seconds)
    }

    pub fn field_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.field_discovery_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable value for {}: {}", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string()
}
