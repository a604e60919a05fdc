//! Issue details tool for reading a single issue page

use crate::error::RedmineMcpResult;
use crate::pages;
use crate::session::{self, SessionManager};
use crate::tools::{numeric_id, settle, ToolOutcome};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};

/// Parameters for the get_issue_details tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetIssueDetailsParams {
    /// Issue ID (required)
    /// Examples: "123", "#123"
    pub issue_id: String,
}

/// Result from the get_issue_details tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetIssueDetailsResult {
    pub success: bool,
    pub message: String,

    /// Every attribute shown on the issue page. Standard attributes use their
    /// CSS class as key (`status`, `assigned_to`...), custom fields appear
    /// under their label and again in `custom_fields` as `cf_<id>`.
    pub issue: Map<String, Value>,
}

impl ToolOutcome for GetIssueDetailsResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for GetIssueDetailsResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize GetIssueDetailsResult\"}}"
            ),
        }
    }
}

/// Implementation of the get_issue_details tool
pub struct GetIssueDetailsTool {
    sessions: Arc<SessionManager>,
}

impl GetIssueDetailsTool {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Execute the get_issue_details tool
    #[instrument(skip(self), fields(issue_id = %params.issue_id))]
    pub async fn execute(
        &self,
        params: GetIssueDetailsParams,
    ) -> RedmineMcpResult<GetIssueDetailsResult> {
        settle("get_issue_details", self.run(params).await)
    }

    async fn run(&self, params: GetIssueDetailsParams) -> RedmineMcpResult<GetIssueDetailsResult> {
        let issue_id = numeric_id("issue_id", &params.issue_id)?;

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let url = session.url(&format!("/issues/{}", issue_id));
        let page = session.open(&url, &[]).await?;
        page.ensure_found("issue", &issue_id)?;
        let issue = pages::parse_issue_details(&page.document(), &issue_id);

        info!(
            "Retrieved issue #{} with {} attributes",
            issue_id,
            issue.len()
        );
        Ok(GetIssueDetailsResult {
            success: true,
            message: format!("Retrieved issue #{}", issue_id),
            issue,
        })
    }
}
