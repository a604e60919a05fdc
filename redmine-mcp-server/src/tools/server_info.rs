//! Server information tool

use crate::config::{RedmineConfig, TrackerMatch};
use crate::error::RedmineMcpResult;
use crate::session::{SessionManager, SessionStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Result from the get_server_info tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfoResult {
    pub success: bool,
    pub message: String,
    pub server_name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub redmine_url: String,
    pub login_url: String,
    pub projects_url: String,
    pub request_timeout_seconds: u64,
    pub session_timeout_seconds: u64,
    pub login_wait_seconds: u64,
    pub field_discovery_timeout_seconds: u64,
    pub default_per_page: u32,
    pub tracker_match: TrackerMatch,
    pub session: SessionStatus,
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for ServerInfoResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize ServerInfoResult\"}}"),
        }
    }
}

/// Implementation of the get_server_info tool
pub struct ServerInfoTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
    start_time: Instant,
}

impl ServerInfoTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self {
            sessions,
            config,
            start_time: Instant::now(),
        }
    }

    /// Execute the get_server_info tool
    #[instrument(skip(self))]
    pub async fn execute(&self) -> RedmineMcpResult<ServerInfoResult> {
        let session = self.sessions.status().await;
        info!("Getting server info (authenticated: {})", session.authenticated);

        let message = if session.authenticated {
            "Server running with an authenticated session"
        } else {
            "Server running; not logged in"
        };

        Ok(ServerInfoResult {
            success: true,
            message: message.to_string(),
            server_name: "Redmine MCP Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            redmine_url: self.config.base_url.clone(),
            login_url: self.config.login_url(),
            projects_url: self.config.projects_url(),
            request_timeout_seconds: self.config.request_timeout_seconds,
            session_timeout_seconds: self.config.session_timeout_seconds,
            login_wait_seconds: self.config.login_wait_seconds,
            field_discovery_timeout_seconds: self.config.field_discovery_timeout_seconds,
            default_per_page: self.config.default_per_page,
            tracker_match: self.config.tracker_match,
            session,
        })
    }
}
