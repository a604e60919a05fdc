//! Login and logout tools
//!
//! Login accepts credentials, falls back to the configured ones, and with
//! both empty waits for a session authenticated elsewhere (for example a
//! cookie copied from a browser after two-factor authentication).

use crate::config::RedmineConfig;
use crate::error::RedmineMcpResult;
use crate::session::SessionManager;
use crate::tools::{settle, ToolOutcome};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Parameters for the redmine_login tool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginParams {
    /// Redmine login name (optional, defaults to REDMINE_USERNAME)
    /// Pass an empty string together with an empty password for manual login.
    pub username: Option<String>,

    /// Redmine password (optional, defaults to REDMINE_PASSWORD)
    pub password: Option<String>,

    /// Session cookie of an already authenticated browser, as `name=value`
    /// (optional, defaults to REDMINE_SESSION_COOKIE)
    /// Example: "_redmine_session=abc123..."
    pub session_cookie: Option<String>,
}

/// Result from the redmine_login tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResult {
    pub success: bool,
    pub message: String,

    /// Page the browser landed on after authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,
}

impl ToolOutcome for LoginResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for LoginResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize LoginResult\"}}"),
        }
    }
}

/// Result from the logout tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoutResult {
    pub success: bool,
    pub message: String,
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for LogoutResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize LogoutResult\"}}"),
        }
    }
}

/// Implementation of the redmine_login and logout tools
pub struct SessionTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl SessionTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the redmine_login tool
    #[instrument(skip(self, params))]
    pub async fn login(&self, params: LoginParams) -> RedmineMcpResult<LoginResult> {
        settle("redmine_login", self.run_login(params).await)
    }

    async fn run_login(&self, params: LoginParams) -> RedmineMcpResult<LoginResult> {
        let explicit = params.username.is_some() || params.password.is_some();
        let (username, password) = if explicit {
            (
                params.username.unwrap_or_default(),
                params.password.unwrap_or_default(),
            )
        } else {
            (
                self.config.username.clone().unwrap_or_default(),
                self.config.password.clone().unwrap_or_default(),
            )
        };
        let cookie = params
            .session_cookie
            .or_else(|| self.config.session_cookie.clone());

        info!(
            "Logging in to {} ({})",
            self.config.base_url,
            if username.is_empty() { "manual" } else { username.as_str() }
        );

        let outcome = self
            .sessions
            .login(username.trim(), &password, cookie.as_deref())
            .await?;

        let user = outcome.current_user.unwrap_or_default();
        let message = match &user.name {
            Some(name) => format!("Successfully logged in as {}", name),
            None if outcome.manual => "Successfully logged in (manual authentication)".to_string(),
            None => "Successfully logged in".to_string(),
        };

        Ok(LoginResult {
            success: true,
            message,
            redirect_url: Some(outcome.redirect_url),
            current_user_id: user.id,
            current_user_name: user.name,
        })
    }

    /// Execute the logout tool; never fails
    #[instrument(skip(self))]
    pub async fn logout(&self) -> RedmineMcpResult<LogoutResult> {
        let was_active = self.sessions.logout().await;
        let message = if was_active {
            "Successfully logged out"
        } else {
            "No active session; already logged out"
        };
        info!("{}", message);
        Ok(LogoutResult {
            success: true,
            message: message.to_string(),
        })
    }
}
