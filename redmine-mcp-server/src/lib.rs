//! Redmine MCP Server Library
//!
//! An MCP server that works with Redmine through its HTML interface, the way a
//! person in a browser would. No REST API access is required: the server keeps
//! an authenticated cookie session, reads the issue forms to learn which fields
//! each tracker has, validates values against the live option lists and
//! submits the forms.
//!
//! ## Features
//!
//! - **Session handling**: credential, configured or manual (2FA) login with
//!   expiry detection and guaranteed logout
//! - **Field discovery**: per-tracker form fields with required/custom flags
//!   and option lists
//! - **Strict validation**: nothing is posted unless every value is valid
//! - **Issue operations**: create, update, details and filtered search
//! - **Error Handling**: MCP-compliant error codes and messages

use crate::config::RedmineConfig;
use crate::error::RedmineMcpResult;
use crate::session::SessionManager;
use crate::tools::{
    CreateIssueParams, CreateIssueResult, CreateIssueTool, GetAvailableStatusesParams,
    GetAvailableTrackersParams, GetAvailableTrackersResult, GetCreationStatusesParams,
    GetIssueDetailsParams, GetIssueDetailsResult, GetIssueDetailsTool, GetProjectMembersParams,
    GetProjectMembersResult, GetProjectsResult, GetTimeEntriesParams, GetTimeEntriesResult,
    GetTimeEntriesTool, GetTrackerFieldsParams, GetTrackerFieldsResult, LoginParams, LoginResult,
    LogoutResult, ProjectsTool, SearchIssuesParams, SearchIssuesResult, SearchIssuesTool,
    ServerInfoResult, ServerInfoTool, SessionTool, StatusesResult, TrackersTool,
    UpdateIssueParams, UpdateIssueResult, UpdateIssueTool, ValidateFieldsParams,
    ValidateFieldsResult, ValidateFieldsTool,
};

use pulseengine_mcp_macros::{mcp_server, mcp_tools};
use std::sync::Arc;
use tracing::{error, info, instrument};

// Re-export modules for external use
pub mod browser;
pub mod config;
pub mod discovery;
pub mod error;
pub mod html;
pub mod pages;
pub mod session;
pub mod tools;
pub mod validation;
pub mod wait;

/// Redmine MCP Server
///
/// Main server implementation that exposes the Redmine web UI as MCP tools.
/// Uses the #[mcp_server] macro for automatic MCP infrastructure generation.
#[mcp_server(
    name = "Redmine MCP Server",
    version = "0.1.0",
    description = "Redmine integration through its web interface: login, field discovery, validated issue creation and search",
    auth = "disabled"
)]
#[derive(Clone)]
pub struct RedmineMcpServer {
    /// Configuration
    config: Arc<RedmineConfig>,

    /// The single browser session, behind its lock
    sessions: Arc<SessionManager>,

    /// Tool implementations
    session_tool: Arc<SessionTool>,
    projects_tool: Arc<ProjectsTool>,
    trackers_tool: Arc<TrackersTool>,
    validate_tool: Arc<ValidateFieldsTool>,
    create_tool: Arc<CreateIssueTool>,
    update_tool: Arc<UpdateIssueTool>,
    issue_details_tool: Arc<GetIssueDetailsTool>,
    search_tool: Arc<SearchIssuesTool>,
    time_entries_tool: Arc<GetTimeEntriesTool>,
    server_info_tool: Arc<ServerInfoTool>,
}

impl Default for RedmineMcpServer {
    fn default() -> Self {
        // The server needs a loaded configuration; use `new()` or `with_config()`
        panic!(
            "RedmineMcpServer cannot be created with default(). Use RedmineMcpServer::new() instead."
        )
    }
}

impl RedmineMcpServer {
    /// Create a new Redmine MCP Server with configuration from file and environment
    #[instrument]
    pub async fn new() -> RedmineMcpResult<Self> {
        info!("Initializing Redmine MCP Server");

        let config = RedmineConfig::load()?;
        info!("Configuration loaded successfully");

        Self::build(Arc::new(config))
    }

    /// Create server with custom configuration (for testing)
    #[instrument(skip(config))]
    pub async fn with_config(mut config: RedmineConfig) -> RedmineMcpResult<Self> {
        config.normalize();
        config.validate()?;
        Self::build(Arc::new(config))
    }

    fn build(config: Arc<RedmineConfig>) -> RedmineMcpResult<Self> {
        let sessions = Arc::new(SessionManager::new(Arc::clone(&config)));

        let server = Self {
            session_tool: Arc::new(SessionTool::new(Arc::clone(&sessions), Arc::clone(&config))),
            projects_tool: Arc::new(ProjectsTool::new(Arc::clone(&sessions), Arc::clone(&config))),
            trackers_tool: Arc::new(TrackersTool::new(Arc::clone(&sessions), Arc::clone(&config))),
            validate_tool: Arc::new(ValidateFieldsTool::new(
                Arc::clone(&sessions),
                Arc::clone(&config),
            )),
            create_tool: Arc::new(CreateIssueTool::new(Arc::clone(&sessions), Arc::clone(&config))),
            update_tool: Arc::new(UpdateIssueTool::new(Arc::clone(&sessions), Arc::clone(&config))),
            issue_details_tool: Arc::new(GetIssueDetailsTool::new(Arc::clone(&sessions))),
            search_tool: Arc::new(SearchIssuesTool::new(Arc::clone(&sessions), Arc::clone(&config))),
            time_entries_tool: Arc::new(GetTimeEntriesTool::new(
                Arc::clone(&sessions),
                Arc::clone(&config),
            )),
            server_info_tool: Arc::new(ServerInfoTool::new(
                Arc::clone(&sessions),
                Arc::clone(&config),
            )),
            sessions,
            config,
        };

        info!(
            "Redmine MCP Server initialized for {}",
            server.config.base_url
        );
        Ok(server)
    }

    /// Log out of Redmine if a session is active. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if self.sessions.logout().await {
            info!("Logged out of Redmine during shutdown");
        }
    }
}

/// All public methods in this impl block become MCP tools automatically
/// The #[mcp_tools] macro discovers these methods and exposes them via MCP
#[mcp_tools]
impl RedmineMcpServer {
    /// Log in to Redmine
    ///
    /// Without arguments the configured REDMINE_USERNAME/REDMINE_PASSWORD are used.
    /// With both username and password empty, the server waits for a session
    /// authenticated elsewhere (for example a session_cookie copied from a browser
    /// after two-factor authentication).
    ///
    /// # Examples
    /// - Use configured credentials: `{}`
    /// - Explicit credentials: `{"username": "jsmith", "password": "secret"}`
    /// - Manual login with a browser cookie: `{"username": "", "password": "", "session_cookie": "_redmine_session=..."}`
    #[instrument(skip(self, params))]
    pub async fn redmine_login(&self, params: LoginParams) -> anyhow::Result<LoginResult> {
        self.session_tool.login(params).await.map_err(|e| {
            error!("redmine_login failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Log out of Redmine
    ///
    /// Always succeeds; logging out twice is harmless.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> anyhow::Result<LogoutResult> {
        self.session_tool.logout().await.map_err(|e| {
            error!("logout failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// List the projects visible to the logged-in user
    #[instrument(skip(self))]
    pub async fn get_projects(&self) -> anyhow::Result<GetProjectsResult> {
        self.projects_tool.list().await.map_err(|e| {
            error!("get_projects failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// List the members of a project with their roles
    ///
    /// Reads the member settings page, or the project overview when settings
    /// are not accessible.
    ///
    /// # Examples
    /// - `{"project_id": "demo"}`
    #[instrument(skip(self))]
    pub async fn get_project_members(
        &self,
        params: GetProjectMembersParams,
    ) -> anyhow::Result<GetProjectMembersResult> {
        self.projects_tool.members(params).await.map_err(|e| {
            error!("get_project_members failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// List the trackers available for new issues
    ///
    /// # Examples
    /// - All trackers you can create issues with: `{}`
    /// - Trackers of a project with their fields: `{"project_id": "demo", "include_fields": true}`
    #[instrument(skip(self))]
    pub async fn get_available_trackers(
        &self,
        params: GetAvailableTrackersParams,
    ) -> anyhow::Result<GetAvailableTrackersResult> {
        self.trackers_tool.available_trackers(params).await.map_err(|e| {
            error!("get_available_trackers failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Discover the issue form fields of a project and tracker
    ///
    /// Returns every field with its type, required flag, default and options,
    /// plus the ids grouped as required, optional, custom and standard.
    ///
    /// # Examples
    /// - Default tracker: `{"project_id": "demo"}`
    /// - Specific tracker: `{"project_id": "demo", "tracker_id": "2"}`
    #[instrument(skip(self))]
    pub async fn get_tracker_fields(
        &self,
        params: GetTrackerFieldsParams,
    ) -> anyhow::Result<GetTrackerFieldsResult> {
        self.trackers_tool.tracker_fields(params).await.map_err(|e| {
            error!("get_tracker_fields failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Statuses a new issue of the given tracker can start in
    ///
    /// # Examples
    /// - `{"project_id": "demo", "tracker_id": "1"}`
    #[instrument(skip(self))]
    pub async fn get_creation_statuses(
        &self,
        params: GetCreationStatusesParams,
    ) -> anyhow::Result<StatusesResult> {
        self.trackers_tool.creation_statuses(params).await.map_err(|e| {
            error!("get_creation_statuses failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Statuses an existing issue can move to
    ///
    /// # Examples
    /// - `{"issue_id": "123"}`
    #[instrument(skip(self))]
    pub async fn get_available_statuses(
        &self,
        params: GetAvailableStatusesParams,
    ) -> anyhow::Result<StatusesResult> {
        self.trackers_tool.available_statuses(params).await.map_err(|e| {
            error!("get_available_statuses failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Check field values against a tracker's form without creating anything
    ///
    /// # Examples
    /// - `{"project_id": "demo", "tracker_id": "1", "fields": {"subject": "Test", "assigned_to_id": "me"}}`
    #[instrument(skip(self, params))]
    pub async fn validate_fields(
        &self,
        params: ValidateFieldsParams,
    ) -> anyhow::Result<ValidateFieldsResult> {
        self.validate_tool.execute(params).await.map_err(|e| {
            error!("validate_fields failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Create an issue
    ///
    /// The tracker must be enabled for the project. All values are validated
    /// against the tracker's form before anything is submitted.
    ///
    /// # Examples
    /// - `{"project_id": "demo", "tracker_id": "1", "fields": {"subject": "Printer on fire", "priority_id": "3"}}`
    /// - Custom field by alias: `{"project_id": "demo", "fields": {"subject": "Onboarding", "cf_5": "ACME"}}`
    #[instrument(skip(self, params))]
    pub async fn create_issue(&self, params: CreateIssueParams) -> anyhow::Result<CreateIssueResult> {
        self.create_tool.execute(params).await.map_err(|e| {
            error!("create_issue failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Update an issue through its edit form
    ///
    /// # Examples
    /// - Change status: `{"issue_id": "123", "fields": {"status_id": "2"}}`
    /// - Add a note: `{"issue_id": "123", "notes": "Fixed in r42"}`
    /// - Switch tracker: `{"issue_id": "123", "tracker_id": "2"}`
    #[instrument(skip(self, params))]
    pub async fn update_issue(&self, params: UpdateIssueParams) -> anyhow::Result<UpdateIssueResult> {
        self.update_tool.execute(params).await.map_err(|e| {
            error!("update_issue failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Get every attribute shown on an issue page
    ///
    /// # Examples
    /// - `{"issue_id": "123"}`
    #[instrument(skip(self))]
    pub async fn get_issue_details(
        &self,
        params: GetIssueDetailsParams,
    ) -> anyhow::Result<GetIssueDetailsResult> {
        self.issue_details_tool.execute(params).await.map_err(|e| {
            error!("get_issue_details failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Search issues with Redmine's list filters
    ///
    /// Every parameter narrows the result. Results are sorted newest first.
    ///
    /// # Examples
    /// - My open issues: `{"assigned_to_id": "me", "status_id": "open"}`
    /// - Bugs mentioning a printer: `{"project_id": "demo", "tracker_id": "1", "q": "printer"}`
    /// - Second page: `{"project_id": "demo", "page": 2, "per_page": 50}`
    #[instrument(skip(self))]
    pub async fn search_issues(
        &self,
        params: SearchIssuesParams,
    ) -> anyhow::Result<SearchIssuesResult> {
        self.search_tool.execute(params).await.map_err(|e| {
            error!("search_issues failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// List spent time of a project
    ///
    /// # Examples
    /// - `{"project_id": "demo", "start_date": "2024-05-01", "end_date": "2024-05-31"}`
    /// - My entries: `{"project_id": "demo", "user_id": "me"}`
    #[instrument(skip(self))]
    pub async fn get_time_entries(
        &self,
        params: GetTimeEntriesParams,
    ) -> anyhow::Result<GetTimeEntriesResult> {
        self.time_entries_tool.execute(params).await.map_err(|e| {
            error!("get_time_entries failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Get server configuration and session status
    #[instrument(skip(self))]
    pub async fn get_server_info(&self) -> anyhow::Result<ServerInfoResult> {
        self.server_info_tool.execute().await.map_err(|e| {
            error!("get_server_info failed: {}", e);
            anyhow::anyhow!(e)
        })
    }
}
