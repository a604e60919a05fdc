//! Spent time listing tool

use crate::config::{RedmineConfig, MAX_PER_PAGE};
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::pages::{self, TimeEntry};
use crate::session::{self, SessionManager};
use crate::tools::search_issues::{paging, push_filters, Filter};
use crate::tools::{numeric_id, page_number, project_identifier, settle, ToolOutcome};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const COLUMNS: &[&str] = &["spent_on", "user", "activity", "issue", "comments", "hours"];

/// Parameters for the get_time_entries tool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetTimeEntriesParams {
    /// Project identifier (required)
    pub project_id: String,

    /// First day to include, YYYY-MM-DD (optional)
    pub start_date: Option<String>,

    /// Last day to include, YYYY-MM-DD (optional)
    pub end_date: Option<String>,

    /// Numeric user ID or "me" (optional)
    pub user_id: Option<String>,

    /// Page number starting at 1 (optional, default: 1)
    pub page: Option<u32>,

    /// Entries per page (optional, default: 25, max: 100)
    pub per_page: Option<u32>,
}

/// Result from the get_time_entries tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetTimeEntriesResult {
    pub success: bool,
    pub message: String,
    pub project_id: String,
    pub time_entries: Vec<TimeEntry>,
    pub total_count: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u64,
    pub has_next: bool,
}

impl ToolOutcome for GetTimeEntriesResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for GetTimeEntriesResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(
                f,
                "{{\"error\": \"Failed to serialize GetTimeEntriesResult\"}}"
            ),
        }
    }
}

fn date(parameter: &str, value: Option<&str>) -> RedmineMcpResult<Option<NaiveDate>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                RedmineMcpError::invalid_param(
                    parameter,
                    format!("'{}' is not a date in YYYY-MM-DD format", v),
                )
            }),
        None => Ok(None),
    }
}

/// Filters for the spent time list
pub(crate) fn time_filters(params: &GetTimeEntriesParams) -> RedmineMcpResult<Vec<Filter>> {
    let start = date("start_date", params.start_date.as_deref())?;
    let end = date("end_date", params.end_date.as_deref())?;
    let format = |d: NaiveDate| d.format("%Y-%m-%d").to_string();

    let mut filters = Vec::new();
    match (start, end) {
        (Some(start), Some(end)) if start > end => {
            return Err(RedmineMcpError::invalid_param(
                "start_date",
                "start_date must not be after end_date",
            ))
        }
        (Some(start), Some(end)) => {
            filters.push(Filter::new("spent_on", "><", vec![format(start), format(end)]))
        }
        (Some(start), None) => filters.push(Filter::new("spent_on", ">=", vec![format(start)])),
        (None, Some(end)) => filters.push(Filter::new("spent_on", "<=", vec![format(end)])),
        (None, None) => {}
    }

    if let Some(user) = params
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
    {
        let user = if user.eq_ignore_ascii_case("me") {
            "me".to_string()
        } else {
            numeric_id("user_id", user)?
        };
        filters.push(Filter::new("user_id", "=", vec![user]));
    }
    Ok(filters)
}

/// Implementation of the get_time_entries tool
pub struct GetTimeEntriesTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl GetTimeEntriesTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the get_time_entries tool
    #[instrument(skip(self), fields(project_id = %params.project_id))]
    pub async fn execute(
        &self,
        params: GetTimeEntriesParams,
    ) -> RedmineMcpResult<GetTimeEntriesResult> {
        settle("get_time_entries", self.run(params).await)
    }

    async fn run(&self, params: GetTimeEntriesParams) -> RedmineMcpResult<GetTimeEntriesResult> {
        let project_id = project_identifier("project_id", &params.project_id)?;
        let page = page_number(params.page)?;
        let per_page = params
            .per_page
            .unwrap_or(self.config.default_per_page)
            .clamp(1, MAX_PER_PAGE);
        let filters = time_filters(&params)?;

        let mut query = vec![
            ("set_filter".to_string(), "1".to_string()),
            ("sort".to_string(), "spent_on:desc".to_string()),
        ];
        push_filters(&mut query, &filters);
        for column in COLUMNS {
            query.push(("c[]".to_string(), column.to_string()));
        }
        query.push(("page".to_string(), page.to_string()));
        query.push(("per_page".to_string(), per_page.to_string()));
        debug!("Time entry query: {:?}", query);

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        let url = session.url(&format!("/projects/{}/time_entries", project_id));
        let list = session.open(&url, &query).await?;
        list.ensure_found("project", &project_id)?;
        let (time_entries, pagination) = {
            let doc = list.document();
            (pages::parse_time_entries(&doc), pages::parse_pagination(&doc))
        };

        let offset = u64::from(page - 1) * u64::from(per_page);
        let total_count = pagination
            .total_count
            .unwrap_or(offset + time_entries.len() as u64);
        let (total_pages, has_next) = paging(total_count, page, per_page, pagination.has_next_link);

        info!(
            "Found {} time entries in {} (page {} of {})",
            time_entries.len(),
            project_id,
            page,
            total_pages
        );
        Ok(GetTimeEntriesResult {
            success: true,
            message: format!("Found {} time entries", total_count),
            project_id,
            time_entries,
            total_count,
            page,
            per_page,
            total_pages,
            has_next,
        })
    }
}
