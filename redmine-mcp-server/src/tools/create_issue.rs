//! Issue creation tool
//!
//! Creation is all-or-nothing on the client side: the tracker is checked
//! against the project, the form for that exact tracker is discovered, and
//! every value is validated before the form is posted.

use crate::config::RedmineConfig;
use crate::discovery::{self, DiscoveredForm, TRACKER_SELECT_ID};
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::html;
use crate::session::{self, SessionManager};
use crate::tools::trackers::resolve_tracker;
use crate::tools::{project_identifier, settle, ToolOutcome};
use crate::validation::validate_fields;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

static ISSUE_PATH: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"^/issues/(\d+)/?$"));

/// Parameters for the create_issue tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateIssueParams {
    /// Project identifier (required)
    pub project_id: String,

    /// Tracker (optional, defaults to the project's default tracker)
    /// Matched by ID, or by name when REDMINE_TRACKER_MATCH=name.
    pub tracker_id: Option<String>,

    /// Field values keyed by field id, short name or custom field alias
    /// Examples: {"subject": "Printer on fire", "priority_id": "2", "assigned_to_id": "me", "cf_5": "ACME"}
    pub fields: Map<String, Value>,
}

/// Result from the create_issue tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateIssueResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_url: Option<String>,
    /// Tracker the issue was created with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<String>,
}

impl ToolOutcome for CreateIssueResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for CreateIssueResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize CreateIssueResult\"}}"),
        }
    }
}

/// Write validated values into the discovered form. Returns the ids written.
pub(crate) fn fill_form(
    discovered: &mut DiscoveredForm,
    resolved: &BTreeMap<String, Vec<String>>,
) -> Vec<String> {
    let mut written = Vec::new();
    for (id, values) in resolved {
        let Some(field) = discovered.field_set.field(id) else {
            continue;
        };
        let html_name = field.html_name.clone();
        if discovered.form.set_values(&html_name, values) {
            debug!("Filled {} with {:?}", html_name, values);
            written.push(id.clone());
        } else {
            warn!("No visible control named {} to fill", html_name);
        }
    }
    written
}

/// Values for the tracker select must go through the tracker parameter so
/// that the form and its field set stay in step.
pub(crate) fn reject_tracker_override(
    discovered: &DiscoveredForm,
    resolved: &BTreeMap<String, Vec<String>>,
) -> RedmineMcpResult<()> {
    match resolved.get(TRACKER_SELECT_ID).and_then(|v| v.first()) {
        Some(value) if Some(value) != discovered.field_set.tracker_id.as_ref() => {
            Err(RedmineMcpError::invalid_param(
                "fields.tracker_id",
                "Change the tracker with the tracker_id parameter, not inside fields",
            ))
        }
        _ => Ok(()),
    }
}

/// Issue ID when the URL is an issue page
pub(crate) fn issue_id_from_url(url: &url::Url) -> Option<String> {
    ISSUE_PATH
        .captures(url.path())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Implementation of the create_issue tool
pub struct CreateIssueTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl CreateIssueTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the create_issue tool
    #[instrument(skip(self, params), fields(project_id = %params.project_id))]
    pub async fn execute(&self, params: CreateIssueParams) -> RedmineMcpResult<CreateIssueResult> {
        settle("create_issue", self.run(params).await)
    }

    async fn run(&self, params: CreateIssueParams) -> RedmineMcpResult<CreateIssueResult> {
        let project_id = project_identifier("project_id", &params.project_id)?;
        if params.fields.is_empty() {
            return Err(RedmineMcpError::invalid_param(
                "fields",
                "No field values given. At least 'subject' is required; use get_tracker_fields to see the others.",
            ));
        }

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let tracker_id = resolve_tracker(
            session,
            &project_id,
            params.tracker_id.as_deref(),
            self.config.tracker_match,
        )
        .await?;

        let mut discovered =
            discovery::discover_new_issue_form(session, &project_id, tracker_id.as_deref()).await?;

        let validation = validate_fields(&discovered.field_set, &params.fields, session.current_user());
        if !validation.valid {
            info!("Not submitting: {}", validation.message);
            return Err(validation.into_error());
        }
        reject_tracker_override(&discovered, &validation.resolved)?;

        let written = fill_form(&mut discovered, &validation.resolved);
        info!(
            "Submitting new issue in {} with {} field(s)",
            project_id,
            written.len()
        );

        let action = if discovered.form.action.is_empty() {
            session.url(&format!("/projects/{}/issues", project_id))
        } else {
            discovered.form.action.clone()
        };
        let page = session
            .submit(&action, &discovered.form.pairs_with_submit("commit"))
            .await?;
        page.ensure_found("project", &project_id)?;

        let effective_tracker = discovered.field_set.tracker_id.clone();
        match issue_id_from_url(&page.url) {
            Some(issue_id) => {
                info!("Created issue #{}", issue_id);
                Ok(CreateIssueResult {
                    success: true,
                    message: format!("Issue #{} created successfully", issue_id),
                    issue_url: Some(page.url.to_string()),
                    issue_id: Some(issue_id),
                    tracker_id: effective_tracker,
                })
            }
            None => {
                let errors = html::error_messages(&page.document());
                let detail = if errors.is_empty() {
                    format!("Redmine rendered {} instead of the new issue", page.url)
                } else {
                    errors.join("; ")
                };
                Err(RedmineMcpError::submission(detail))
            }
        }
    }
}
