//! Dry-run validation of issue field values

use crate::config::RedmineConfig;
use crate::discovery;
use crate::error::RedmineMcpResult;
use crate::session::{self, SessionManager};
use crate::tools::trackers::resolve_tracker;
use crate::tools::{project_identifier, settle, ToolOutcome};
use crate::validation::{self, FieldError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Parameters for the validate_fields tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ValidateFieldsParams {
    /// Project identifier (required)
    pub project_id: String,

    /// Tracker (optional, defaults to the project's default tracker)
    pub tracker_id: Option<String>,

    /// Field values exactly as they would be passed to create_issue
    pub fields: Map<String, Value>,
}

/// Result from the validate_fields tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateFieldsResult {
    pub success: bool,
    pub message: String,
    /// Whether create_issue would accept these values
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<String>,
    pub errors: Vec<FieldError>,
    /// Form values the fields resolve to, keyed by field id
    pub resolved: BTreeMap<String, Vec<String>>,
}

impl ToolOutcome for ValidateFieldsResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for ValidateFieldsResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize ValidateFieldsResult\"}}"
            ),
        }
    }
}

/// Implementation of the validate_fields tool
pub struct ValidateFieldsTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl ValidateFieldsTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the validate_fields tool
    #[instrument(skip(self, params), fields(project_id = %params.project_id))]
    pub async fn execute(
        &self,
        params: ValidateFieldsParams,
    ) -> RedmineMcpResult<ValidateFieldsResult> {
        settle("validate_fields", self.run(params).await)
    }

    async fn run(&self, params: ValidateFieldsParams) -> RedmineMcpResult<ValidateFieldsResult> {
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
        let result = validation::validate_fields(
            &discovered.field_set,
            &params.fields,
            session.current_user(),
        );
        info!("{}", result.message);

        Ok(ValidateFieldsResult {
            success: true,
            message: result.message,
            valid: result.valid,
            tracker_id: discovered.field_set.tracker_id,
            errors: result.errors,
            resolved: result.resolved,
        })
    }
}
