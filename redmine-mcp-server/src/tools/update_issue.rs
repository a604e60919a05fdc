//! Issue update tool
//!
//! Updates go through the issue's edit form, so only the fields the current
//! user may change on the current workflow state are accepted.

use crate::config::RedmineConfig;
use crate::discovery;
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::html;
use crate::session::{self, SessionManager};
use crate::tools::create_issue::{fill_form, issue_id_from_url, reject_tracker_override};
use crate::tools::trackers::{describe, match_tracker};
use crate::tools::{numeric_id, settle, ToolOutcome};
use crate::validation::validate_fields;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

const NOTES_FIELD: &str = "issue[notes]";

/// Parameters for the update_issue tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateIssueParams {
    /// Issue ID (required)
    /// Examples: "123", "#123"
    pub issue_id: String,

    /// New tracker (optional); the form is re-rendered for it before validation
    pub tracker_id: Option<String>,

    /// New field values keyed by field id, short name or custom field alias (optional)
    /// Examples: {"status_id": "2", "done_ratio": "50", "assigned_to_id": "me"}
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Journal note added with the update (optional)
    pub notes: Option<String>,
}

/// Result from the update_issue tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateIssueResult {
    pub success: bool,
    pub message: String,
    /// Field ids written into the edit form
    pub updated_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl ToolOutcome for UpdateIssueResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for UpdateIssueResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize UpdateIssueResult\"}}"),
        }
    }
}

/// Implementation of the update_issue tool
pub struct UpdateIssueTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl UpdateIssueTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the update_issue tool
    #[instrument(skip(self, params), fields(issue_id = %params.issue_id))]
    pub async fn execute(&self, params: UpdateIssueParams) -> RedmineMcpResult<UpdateIssueResult> {
        settle("update_issue", self.run(params).await)
    }

    async fn run(&self, params: UpdateIssueParams) -> RedmineMcpResult<UpdateIssueResult> {
        let issue_id = numeric_id("issue_id", &params.issue_id)?;
        let notes = params.notes.filter(|n| !n.trim().is_empty());
        let wanted_tracker = params.tracker_id.filter(|t| !t.trim().is_empty());
        if params.fields.is_empty() && notes.is_none() && wanted_tracker.is_none() {
            return Err(RedmineMcpError::invalid_param(
                "fields",
                "Nothing to update. Pass fields, notes or tracker_id.",
            ));
        }

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let mut discovered = discovery::discover_edit_form(session, &issue_id, None).await?;
        let mut updated_fields = Vec::new();

        if let Some(wanted) = wanted_tracker.as_deref() {
            let tracker = match_tracker(
                &discovered.field_set.tracker_options,
                wanted,
                self.config.tracker_match,
            )
            .ok_or_else(|| {
                RedmineMcpError::validation(format!(
                    "Invalid tracker: Tracker '{}' is not available for issue #{}. Available trackers: {}",
                    wanted,
                    issue_id,
                    describe(&discovered.field_set.tracker_options)
                ))
            })?
            .value
            .clone();

            if discovered.field_set.tracker_id.as_deref() != Some(tracker.as_str()) {
                info!("Switching issue #{} to tracker {}", issue_id, tracker);
                discovered = discovery::discover_edit_form(session, &issue_id, Some(&tracker)).await?;
                updated_fields.push("issue_tracker_id".to_string());
            }
        }

        let validation = validate_fields(&discovered.field_set, &params.fields, session.current_user());
        if !validation.valid {
            info!("Not submitting: {}", validation.message);
            return Err(validation.into_error());
        }
        reject_tracker_override(&discovered, &validation.resolved)?;
        updated_fields.extend(fill_form(&mut discovered, &validation.resolved));

        if let Some(notes) = notes {
            if !discovered.form.set_values(NOTES_FIELD, &[notes]) {
                return Err(RedmineMcpError::permission(format!(
                    "Issue #{} does not accept notes from this user",
                    issue_id
                )));
            }
            updated_fields.push("issue_notes".to_string());
        }
        keep_first_occurrences(&mut updated_fields);

        let action = if discovered.form.action.is_empty() {
            session.url(&format!("/issues/{}", issue_id))
        } else {
            discovered.form.action.clone()
        };
        let page = session
            .submit(&action, &discovered.form.pairs_with_submit("commit"))
            .await?;
        page.ensure_found("issue", &issue_id)?;

        let errors = html::error_messages(&page.document());
        let landed_on_issue = issue_id_from_url(&page.url).as_deref() == Some(issue_id.as_str());
        if !landed_on_issue || !errors.is_empty() {
            let detail = if errors.is_empty() {
                format!("Redmine rendered {} instead of issue #{}", page.url, issue_id)
            } else {
                errors.join("; ")
            };
            return Err(RedmineMcpError::submission(detail));
        }

        info!("Updated issue #{}: {:?}", issue_id, updated_fields);
        Ok(UpdateIssueResult {
            success: true,
            message: format!(
                "Issue #{} updated successfully ({} field(s))",
                issue_id,
                updated_fields.len()
            ),
            updated_fields,
            redirect_url: Some(page.url.to_string()),
        })
    }
}

/// Drop repeated field names, keeping the first occurrence of each
fn keep_first_occurrences(fields: &mut Vec<String>) {
    let mut seen = HashSet::new();
    fields.retain(|field| seen.insert(field.clone()));
}
