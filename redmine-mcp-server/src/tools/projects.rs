//! Project listing and project member tools

use crate::config::RedmineConfig;
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::pages::{self, MemberInfo, ProjectInfo};
use crate::session::{self, SessionManager};
use crate::tools::{project_identifier, settle, ToolOutcome};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result from the get_projects tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetProjectsResult {
    pub success: bool,
    pub message: String,
    pub projects: Vec<ProjectInfo>,
}

impl ToolOutcome for GetProjectsResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for GetProjectsResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize GetProjectsResult\"}}"),
        }
    }
}

/// Parameters for the get_project_members tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetProjectMembersParams {
    /// Project identifier or numeric project ID (required)
    /// Examples: "demo", "42"
    pub project_id: String,
}

/// Result from the get_project_members tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetProjectMembersResult {
    pub success: bool,
    pub message: String,
    pub project_id: String,
    pub members: Vec<MemberInfo>,

    /// `settings` or `overview`, depending on which page listed the members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ToolOutcome for GetProjectMembersResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for GetProjectMembersResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize GetProjectMembersResult\"}}"
            ),
        }
    }
}

/// Implementation of the get_projects and get_project_members tools
pub struct ProjectsTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl ProjectsTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the get_projects tool
    #[instrument(skip(self))]
    pub async fn list(&self) -> RedmineMcpResult<GetProjectsResult> {
        settle("get_projects", self.run_list().await)
    }

    async fn run_list(&self) -> RedmineMcpResult<GetProjectsResult> {
        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let page = session.open(&self.config.projects_url(), &[]).await?;
        page.ensure_found("page", "projects")?;
        let projects = pages::parse_projects(&page.document(), &page.url);

        info!("Found {} projects", projects.len());
        Ok(GetProjectsResult {
            success: true,
            message: format!("Found {} projects", projects.len()),
            projects,
        })
    }

    /// Execute the get_project_members tool
    #[instrument(skip(self), fields(project_id = %params.project_id))]
    pub async fn members(
        &self,
        params: GetProjectMembersParams,
    ) -> RedmineMcpResult<GetProjectMembersResult> {
        settle("get_project_members", self.run_members(params).await)
    }

    async fn run_members(
        &self,
        params: GetProjectMembersParams,
    ) -> RedmineMcpResult<GetProjectMembersResult> {
        let project_id = project_identifier("project_id", &params.project_id)?;

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;
        let me = session.current_user().and_then(|u| u.id.clone());

        let settings_url = session.url(&format!("/projects/{}/settings/members", project_id));
        let page = session.open(&settings_url, &[]).await?;
        let from_settings = match page.ensure_found("project", &project_id) {
            Ok(()) => pages::parse_settings_members(&page.document(), me.as_deref()),
            Err(RedmineMcpError::Permission { .. }) => {
                warn!(
                    "Member settings of {} are forbidden, falling back to the overview page",
                    project_id
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let (members, source) = if from_settings.is_empty() {
            let overview_url = session.url(&format!("/projects/{}", project_id));
            let page = session.open(&overview_url, &[]).await?;
            page.ensure_found("project", &project_id)?;
            let members = pages::parse_overview_members(&page.document(), me.as_deref());
            (members, "overview")
        } else {
            (from_settings, "settings")
        };

        info!(
            "Found {} members in project {} ({} page)",
            members.len(),
            project_id,
            source
        );
        Ok(GetProjectMembersResult {
            success: true,
            message: format!("Found {} members in project {}", members.len(), project_id),
            project_id,
            members,
            source: Some(source.to_string()),
        })
    }
}
