//! Tracker, field and status discovery tools
//!
//! All four tools read the live issue forms, so the answers reflect the
//! workflow and permissions of the logged-in user rather than global settings.

use crate::config::{RedmineConfig, TrackerMatch};
use crate::discovery::{
    self, FieldDefinition, ISSUE_FORM_SELECTORS, STATUS_SELECT_ID, TRACKER_SELECT_ID,
};
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::html::{FormSnapshot, SelectOption};
use crate::session::{self, RedmineSession, SessionManager};
use crate::tools::{numeric_id, project_identifier, settle, ToolOutcome};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Trackers offered by the new-issue form of a project, or of the global
/// new-issue page without one
pub(crate) async fn list_trackers(
    session: &mut RedmineSession,
    project_id: Option<&str>,
) -> RedmineMcpResult<Vec<SelectOption>> {
    let (url, resource, key) = match project_id {
        Some(project) => (
            session.url(&format!("/projects/{}/issues/new", project)),
            "project",
            project.to_string(),
        ),
        None => (session.url("/issues/new"), "page", "issues/new".to_string()),
    };

    let page = session.open(&url, &[]).await?;
    page.ensure_found(resource, &key)?;
    let form = FormSnapshot::find(&page.document(), ISSUE_FORM_SELECTORS).ok_or_else(|| {
        RedmineMcpError::permission(format!(
            "No issue form for {} '{}' (missing permission to add issues or no trackers enabled)",
            resource, key
        ))
    })?;

    let trackers: Vec<SelectOption> = form
        .control_by_id(TRACKER_SELECT_ID)
        .map(|select| {
            select
                .options
                .iter()
                .filter(|o| !o.value.trim().is_empty())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    debug!("Tracker options on {}: {}", page.url, describe(&trackers));
    Ok(trackers)
}

/// Find the tracker a caller meant.
///
/// `Id` matches the option value only and `Name` matches the rendered name
/// only, case-insensitively.
pub(crate) fn match_tracker<'a>(
    trackers: &'a [SelectOption],
    wanted: &str,
    mode: TrackerMatch,
) -> Option<&'a SelectOption> {
    let wanted = wanted.trim();
    match mode {
        TrackerMatch::Id => trackers.iter().find(|t| t.value == wanted),
        TrackerMatch::Name => trackers
            .iter()
            .find(|t| t.text.trim().eq_ignore_ascii_case(wanted)),
    }
}

/// Resolve a caller's tracker against the project's trackers.
///
/// `None` keeps the project's default tracker. A tracker the project does not
/// offer is a validation failure; no other tracker is substituted.
pub(crate) async fn resolve_tracker(
    session: &mut RedmineSession,
    project_id: &str,
    wanted: Option<&str>,
    mode: TrackerMatch,
) -> RedmineMcpResult<Option<String>> {
    let Some(wanted) = wanted.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let trackers = list_trackers(session, Some(project_id)).await?;
    match match_tracker(&trackers, wanted, mode) {
        Some(tracker) => Ok(Some(tracker.value.clone())),
        None => Err(RedmineMcpError::validation(format!(
            "Invalid tracker: Tracker '{}' is not available for project {}. Available trackers: {}",
            wanted,
            project_id,
            describe(&trackers)
        ))),
    }
}

/// `1:Bug, 2:Feature` listing used in error messages
pub(crate) fn describe(trackers: &[SelectOption]) -> String {
    trackers
        .iter()
        .map(|t| format!("{}:{}", t.value, t.text))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One tracker of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerInfo {
    pub id: String,
    pub name: String,
    /// The tracker the form preselects
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldDefinition>>,
}

/// One status option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub id: String,
    pub name: String,
    /// Preselected on the form (the default or the issue's current status)
    pub is_selected: bool,
}

fn statuses_of(form: &FormSnapshot) -> Vec<StatusInfo> {
    form.control_by_id(STATUS_SELECT_ID)
        .map(|select| {
            let selected = form.selected_value(STATUS_SELECT_ID);
            select
                .options
                .iter()
                .filter(|o| !o.value.trim().is_empty())
                .map(|o| StatusInfo {
                    id: o.value.clone(),
                    name: o.text.clone(),
                    is_selected: selected.as_deref() == Some(o.value.as_str()),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parameters for the get_available_trackers tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetAvailableTrackersParams {
    /// Project identifier (optional). Without it the global new-issue page is read.
    pub project_id: Option<String>,

    /// Also discover the form fields of every tracker (optional, default: false)
    /// Requires project_id.
    pub include_fields: Option<bool>,
}

/// Result from the get_available_trackers tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetAvailableTrackersResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub trackers: Vec<TrackerInfo>,
}

impl ToolOutcome for GetAvailableTrackersResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for GetAvailableTrackersResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize GetAvailableTrackersResult\"}}"
            ),
        }
    }
}

/// Parameters for the get_tracker_fields tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetTrackerFieldsParams {
    /// Project identifier (required)
    pub project_id: String,

    /// Tracker ID (optional, defaults to the project's default tracker)
    /// Examples: "1", "2"
    pub tracker_id: Option<String>,
}

/// Result from the get_tracker_fields tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetTrackerFieldsResult {
    pub success: bool,
    pub message: String,
    pub project_id: String,
    /// Tracker the returned fields belong to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<String>,
    pub fields: Vec<FieldDefinition>,
    /// Field ids by category
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    pub custom_fields: Vec<String>,
    pub standard_fields: Vec<String>,
}

impl ToolOutcome for GetTrackerFieldsResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for GetTrackerFieldsResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize GetTrackerFieldsResult\"}}"
            ),
        }
    }
}

/// Parameters for the get_creation_statuses tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetCreationStatusesParams {
    /// Project identifier (required)
    pub project_id: String,

    /// Tracker ID (required)
    pub tracker_id: String,
}

/// Parameters for the get_available_statuses tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetAvailableStatusesParams {
    /// Issue ID (required)
    /// Examples: "123", "#123"
    pub issue_id: String,
}

/// Result from the get_creation_statuses and get_available_statuses tools
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusesResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    pub statuses: Vec<StatusInfo>,
}

impl ToolOutcome for StatusesResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for StatusesResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize StatusesResult\"}}"),
        }
    }
}

/// Implementation of the tracker, field and status tools
pub struct TrackersTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl TrackersTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the get_available_trackers tool
    #[instrument(skip(self))]
    pub async fn available_trackers(
        &self,
        params: GetAvailableTrackersParams,
    ) -> RedmineMcpResult<GetAvailableTrackersResult> {
        settle(
            "get_available_trackers",
            self.run_available_trackers(params).await,
        )
    }

    async fn run_available_trackers(
        &self,
        params: GetAvailableTrackersParams,
    ) -> RedmineMcpResult<GetAvailableTrackersResult> {
        let project_id = params
            .project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| project_identifier("project_id", p))
            .transpose()?;
        let include_fields = params.include_fields.unwrap_or(false);
        if include_fields && project_id.is_none() {
            return Err(RedmineMcpError::invalid_param(
                "include_fields",
                "Field discovery needs a project_id",
            ));
        }

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let options = list_trackers(session, project_id.as_deref()).await?;
        let default_tracker = options.iter().find(|o| o.selected).or(options.first());
        let default_id = default_tracker.map(|o| o.value.clone());

        let mut trackers = Vec::with_capacity(options.len());
        for option in &options {
            let fields = match (&project_id, include_fields) {
                (Some(project), true) => {
                    let discovered =
                        discovery::discover_new_issue_form(session, project, Some(&option.value))
                            .await?;
                    Some(discovered.field_set.fields)
                }
                _ => None,
            };
            trackers.push(TrackerInfo {
                id: option.value.clone(),
                name: option.text.clone(),
                is_default: default_id.as_deref() == Some(option.value.as_str()),
                fields,
            });
        }

        info!("Found {} trackers", trackers.len());
        Ok(GetAvailableTrackersResult {
            success: true,
            message: format!("Found {} available trackers", trackers.len()),
            project_id,
            trackers,
        })
    }

    /// Execute the get_tracker_fields tool
    #[instrument(skip(self))]
    pub async fn tracker_fields(
        &self,
        params: GetTrackerFieldsParams,
    ) -> RedmineMcpResult<GetTrackerFieldsResult> {
        settle("get_tracker_fields", self.run_tracker_fields(params).await)
    }

    async fn run_tracker_fields(
        &self,
        params: GetTrackerFieldsParams,
    ) -> RedmineMcpResult<GetTrackerFieldsResult> {
        let project_id = project_identifier("project_id", &params.project_id)?;

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let tracker_id = resolve_tracker(
            session,
            &project_id,
            params.tracker_id.as_deref(),
            self.config.tracker_match,
        )
        .await?;

        let discovered =
            discovery::discover_new_issue_form(session, &project_id, tracker_id.as_deref()).await?;
        let field_set = discovered.field_set;

        let ids = |fields: Vec<&FieldDefinition>| -> Vec<String> {
            fields.into_iter().map(|f| f.id.clone()).collect()
        };
        let required_fields = ids(field_set.required_fields().collect());
        let optional_fields = ids(field_set.optional_fields().collect());
        let custom_fields = ids(field_set.custom_fields().collect());
        let standard_fields = ids(field_set.standard_fields().collect());

        Ok(GetTrackerFieldsResult {
            success: true,
            message: format!(
                "Found {} fields ({} required) for tracker {}",
                field_set.fields.len(),
                required_fields.len(),
                field_set.tracker_id.as_deref().unwrap_or("default")
            ),
            project_id,
            tracker_id: field_set.tracker_id,
            fields: field_set.fields,
            required_fields,
            optional_fields,
            custom_fields,
            standard_fields,
        })
    }

    /// Execute the get_creation_statuses tool
    #[instrument(skip(self))]
    pub async fn creation_statuses(
        &self,
        params: GetCreationStatusesParams,
    ) -> RedmineMcpResult<StatusesResult> {
        settle(
            "get_creation_statuses",
            self.run_creation_statuses(params).await,
        )
    }

    async fn run_creation_statuses(
        &self,
        params: GetCreationStatusesParams,
    ) -> RedmineMcpResult<StatusesResult> {
        let project_id = project_identifier("project_id", &params.project_id)?;
        let tracker_id = numeric_id("tracker_id", &params.tracker_id)?;

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let discovered =
            discovery::discover_new_issue_form(session, &project_id, Some(&tracker_id)).await?;
        let statuses = statuses_of(&discovered.form);

        Ok(StatusesResult {
            success: true,
            message: format!(
                "Found {} statuses for new {} issues in {}",
                statuses.len(),
                tracker_id,
                project_id
            ),
            project_id: Some(project_id),
            tracker_id: Some(tracker_id),
            issue_id: None,
            statuses,
        })
    }

    /// Execute the get_available_statuses tool
    #[instrument(skip(self))]
    pub async fn available_statuses(
        &self,
        params: GetAvailableStatusesParams,
    ) -> RedmineMcpResult<StatusesResult> {
        settle(
            "get_available_statuses",
            self.run_available_statuses(params).await,
        )
    }

    async fn run_available_statuses(
        &self,
        params: GetAvailableStatusesParams,
    ) -> RedmineMcpResult<StatusesResult> {
        let issue_id = numeric_id("issue_id", &params.issue_id)?;

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let discovered = discovery::discover_edit_form(session, &issue_id, None).await?;
        let statuses = statuses_of(&discovered.form);

        Ok(StatusesResult {
            success: true,
            message: format!(
                "Found {} statuses available for issue #{}",
                statuses.len(),
                issue_id
            ),
            project_id: Some(discovered.field_set.project_id).filter(|p| !p.is_empty()),
            tracker_id: discovered.field_set.tracker_id,
            issue_id: Some(issue_id),
            statuses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::tests::NEW_ISSUE_FORM;
    use scraper::Html;

    fn trackers() -> Vec<SelectOption> {
        vec![
            SelectOption {
                value: "1".to_string(),
                text: "Bug".to_string(),
                selected: false,
            },
            SelectOption {
                value: "2".to_string(),
                text: "Feature".to_string(),
                selected: true,
            },
        ]
    }

    #[test]
    fn test_match_tracker_by_id_is_strict() {
        let trackers = trackers();
        assert_eq!(
            match_tracker(&trackers, "2", TrackerMatch::Id).map(|t| t.text.as_str()),
            Some("Feature")
        );
        assert!(match_tracker(&trackers, "Bug", TrackerMatch::Id).is_none());
        assert!(match_tracker(&trackers, "9", TrackerMatch::Id).is_none());
    }

    #[test]
    fn test_match_tracker_by_name() {
        let trackers = trackers();
        assert_eq!(
            match_tracker(&trackers, "bug", TrackerMatch::Name).map(|t| t.value.as_str()),
            Some("1")
        );
        assert_eq!(
            match_tracker(&trackers, " FEATURE ", TrackerMatch::Name).map(|t| t.value.as_str()),
            Some("2")
        );
        assert!(match_tracker(&trackers, "2", TrackerMatch::Name).is_none());
    }

    #[test]
    fn test_describe_trackers() {
        assert_eq!(describe(&trackers()), "1:Bug, 2:Feature");
    }

    #[test]
    fn test_statuses_of_form() {
        let doc = Html::parse_document(NEW_ISSUE_FORM);
        let form = FormSnapshot::find(&doc, ISSUE_FORM_SELECTORS).unwrap();
        let statuses = statuses_of(&form);
        assert!(!statuses.is_empty());
        assert_eq!(statuses.iter().filter(|s| s.is_selected).count(), 1);
    }
}
