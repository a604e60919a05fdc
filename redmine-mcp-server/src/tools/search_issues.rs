//! Search issues tool using Redmine's issue list filters
//!
//! Every parameter adds one filter to the list query and filters are ANDed by
//! Redmine, so adding a parameter can only narrow the result.

use crate::config::{RedmineConfig, TrackerMatch, MAX_PER_PAGE};
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::pages::{self, IssueRow};
use crate::session::{self, SessionManager};
use crate::tools::trackers::{describe, list_trackers, match_tracker};
use crate::tools::{numeric_id, page_number, project_identifier, settle, ToolOutcome};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Columns requested from the issue list
const COLUMNS: &[&str] = &[
    "project",
    "tracker",
    "status",
    "priority",
    "subject",
    "assigned_to",
    "updated_on",
];

/// Parameters for the search_issues tool
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchIssuesParams {
    /// Project identifier (optional); includes subprojects as Redmine does
    pub project_id: Option<String>,

    /// Tracker ID, or tracker name when REDMINE_TRACKER_MATCH=name (optional)
    pub tracker_id: Option<String>,

    /// Status filter (optional)
    /// Values: "open", "closed", "*" (any), or a numeric status ID
    pub status_id: Option<String>,

    /// Assignee (optional): a numeric user ID or "me"
    pub assigned_to_id: Option<String>,

    /// Parent issue ID (optional)
    pub parent_id: Option<String>,

    /// Text contained in the subject (optional)
    pub subject: Option<String>,

    /// Text contained in the description (optional)
    pub description: Option<String>,

    /// Text contained in the journal notes (optional)
    pub notes: Option<String>,

    /// Free text searched in subject, description and notes (optional)
    pub q: Option<String>,

    /// Page number starting at 1 (optional, default: 1)
    pub page: Option<u32>,

    /// Issues per page (optional, default: 25, max: 100)
    pub per_page: Option<u32>,
}

/// Result from the search_issues tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchIssuesResult {
    pub success: bool,
    pub message: String,
    pub issues: Vec<IssueRow>,
    pub total_count: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u64,
    pub has_next: bool,
}

impl ToolOutcome for SearchIssuesResult {
    fn failure(message: String) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

// Workaround for pulseengine-mcp-macros issue
impl std::fmt::Display for SearchIssuesResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{{\"error\": \"Failed to serialize SearchIssuesResult\"}}"),
        }
    }
}

/// One `f[]`/`op[]`/`v[][]` triple of the issue list query
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Filter {
    field: &'static str,
    operator: &'static str,
    values: Vec<String>,
}

impl Filter {
    pub(crate) fn new(field: &'static str, operator: &'static str, values: Vec<String>) -> Self {
        Self {
            field,
            operator,
            values,
        }
    }
}

fn status_filter(value: &str) -> RedmineMcpResult<Filter> {
    match value.trim().to_lowercase().as_str() {
        "open" | "o" => Ok(Filter::new("status_id", "o", Vec::new())),
        "closed" | "c" => Ok(Filter::new("status_id", "c", Vec::new())),
        "*" | "all" | "any" => Ok(Filter::new("status_id", "*", Vec::new())),
        other => {
            let id = numeric_id("status_id", other).map_err(|_| {
                RedmineMcpError::invalid_param(
                    "status_id",
                    format!(
                        "'{}' is not a status. Use 'open', 'closed', '*' or a status ID from get_available_statuses.",
                        value
                    ),
                )
            })?;
            Ok(Filter::new("status_id", "=", vec![id]))
        }
    }
}

fn assignee_filter(value: &str) -> RedmineMcpResult<Filter> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("me") {
        return Ok(Filter::new("assigned_to_id", "=", vec!["me".to_string()]));
    }
    let id = numeric_id("assigned_to_id", value)?;
    Ok(Filter::new("assigned_to_id", "=", vec![id]))
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Filters for every parameter except project and tracker, which need the
/// session to resolve
pub(crate) fn filters_for(params: &SearchIssuesParams) -> RedmineMcpResult<Vec<Filter>> {
    let mut filters = Vec::new();
    if let Some(status) = text(&params.status_id) {
        filters.push(status_filter(&status)?);
    }
    if let Some(assignee) = text(&params.assigned_to_id) {
        filters.push(assignee_filter(&assignee)?);
    }
    if let Some(parent) = text(&params.parent_id) {
        filters.push(Filter::new("parent_id", "=", vec![numeric_id("parent_id", &parent)?]));
    }
    if let Some(subject) = text(&params.subject) {
        filters.push(Filter::new("subject", "~", vec![subject]));
    }
    if let Some(description) = text(&params.description) {
        filters.push(Filter::new("description", "~", vec![description]));
    }
    if let Some(notes) = text(&params.notes) {
        filters.push(Filter::new("notes", "~", vec![notes]));
    }
    if let Some(q) = text(&params.q) {
        filters.push(Filter::new("any_searchable", "~", vec![q]));
    }
    Ok(filters)
}

/// Append filters in the layout of Redmine's query form, closed by the empty
/// `f[]` marker
pub(crate) fn push_filters(query: &mut Vec<(String, String)>, filters: &[Filter]) {
    for filter in filters {
        query.push(("f[]".to_string(), filter.field.to_string()));
        query.push((format!("op[{}]", filter.field), filter.operator.to_string()));
        for value in &filter.values {
            query.push((format!("v[{}][]", filter.field), value.clone()));
        }
    }
    query.push(("f[]".to_string(), String::new()));
}

/// Query string pairs for the issue list
pub(crate) fn build_query(filters: &[Filter], page: u32, per_page: u32) -> Vec<(String, String)> {
    let mut query = vec![
        ("set_filter".to_string(), "1".to_string()),
        ("sort".to_string(), "id:desc".to_string()),
    ];
    push_filters(&mut query, filters);
    for column in COLUMNS {
        query.push(("c[]".to_string(), column.to_string()));
    }
    query.push(("group_by".to_string(), String::new()));
    query.push(("t[]".to_string(), String::new()));
    query.push(("page".to_string(), page.to_string()));
    query.push(("per_page".to_string(), per_page.to_string()));
    query
}

/// `(total_pages, has_next)` for a page of a list
pub(crate) fn paging(total_count: u64, page: u32, per_page: u32, next_link: bool) -> (u64, bool) {
    let per_page = u64::from(per_page.max(1));
    let total_pages = total_count.div_ceil(per_page).max(1);
    (total_pages, next_link || u64::from(page) < total_pages)
}

/// Implementation of the search_issues tool
pub struct SearchIssuesTool {
    sessions: Arc<SessionManager>,
    config: Arc<RedmineConfig>,
}

impl SearchIssuesTool {
    pub fn new(sessions: Arc<SessionManager>, config: Arc<RedmineConfig>) -> Self {
        Self { sessions, config }
    }

    /// Execute the search_issues tool
    #[instrument(skip(self))]
    pub async fn execute(&self, params: SearchIssuesParams) -> RedmineMcpResult<SearchIssuesResult> {
        settle("search_issues", self.run(params).await)
    }

    async fn run(&self, params: SearchIssuesParams) -> RedmineMcpResult<SearchIssuesResult> {
        let page = page_number(params.page)?;
        let per_page = params
            .per_page
            .unwrap_or(self.config.default_per_page)
            .clamp(1, MAX_PER_PAGE);
        let project_id = text(&params.project_id)
            .map(|p| project_identifier("project_id", &p))
            .transpose()?;
        let mut filters = filters_for(&params)?;

        let mut slot = self.sessions.lock().await;
        let session = session::active(&mut slot)?;

        if let Some(wanted) = text(&params.tracker_id) {
            let tracker = match self.config.tracker_match {
                TrackerMatch::Name => {
                    let trackers = list_trackers(session, project_id.as_deref()).await?;
                    match_tracker(&trackers, &wanted, TrackerMatch::Name)
                        .map(|t| t.value.clone())
                        .ok_or_else(|| {
                            RedmineMcpError::validation(format!(
                                "Invalid tracker: Tracker '{}' is not available. Available trackers: {}",
                                wanted,
                                describe(&trackers)
                            ))
                        })?
                }
                TrackerMatch::Id => numeric_id("tracker_id", &wanted)?,
            };
            filters.insert(0, Filter::new("tracker_id", "=", vec![tracker]));
        }

        let url = match &project_id {
            Some(project) => session.url(&format!("/projects/{}/issues", project)),
            None => session.url("/issues"),
        };
        let query = build_query(&filters, page, per_page);
        debug!("Issue query: {:?}", query);

        let list = session.open(&url, &query).await?;
        match &project_id {
            Some(project) => list.ensure_found("project", project)?,
            None => list.ensure_found("page", "issues")?,
        }
        let (issues, pagination) = {
            let doc = list.document();
            (
                pages::parse_issue_rows(&doc, &list.url),
                pages::parse_pagination(&doc),
            )
        };

        let offset = u64::from(page - 1) * u64::from(per_page);
        let total_count = pagination
            .total_count
            .unwrap_or(offset + issues.len() as u64);
        let (total_pages, has_next) = paging(total_count, page, per_page, pagination.has_next_link);

        info!(
            "Found {} issues on page {} of {} ({} total)",
            issues.len(),
            page,
            total_pages,
            total_count
        );
        Ok(SearchIssuesResult {
            success: true,
            message: format!("Found {} issues (page {} of {})", total_count, page, total_pages),
            issues,
            total_count,
            page,
            per_page,
            total_pages,
            has_next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<'a>(query: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn test_status_filters() {
        assert_eq!(status_filter("open").unwrap(), Filter::new("status_id", "o", vec![]));
        assert_eq!(status_filter("closed").unwrap().operator, "c");
        assert_eq!(status_filter("*").unwrap().operator, "*");
        assert_eq!(
            status_filter("3").unwrap(),
            Filter::new("status_id", "=", vec!["3".to_string()])
        );
        assert!(status_filter("resolved").is_err());
    }

    #[test]
    fn test_query_layout() {
        let params = SearchIssuesParams {
            status_id: Some("open".to_string()),
            assigned_to_id: Some("me".to_string()),
            q: Some("printer".to_string()),
            ..Default::default()
        };
        let filters = filters_for(&params).unwrap();
        let query = build_query(&filters, 2, 50);

        assert_eq!(query[0], ("set_filter".to_string(), "1".to_string()));
        assert_eq!(values(&query, "sort"), vec!["id:desc"]);
        assert_eq!(values(&query, "f[]"), vec!["status_id", "assigned_to_id", "any_searchable", ""]);
        assert_eq!(values(&query, "op[any_searchable]"), vec!["~"]);
        assert_eq!(values(&query, "v[any_searchable][]"), vec!["printer"]);
        assert_eq!(values(&query, "v[assigned_to_id][]"), vec!["me"]);
        assert!(values(&query, "v[status_id][]").is_empty());
        assert_eq!(values(&query, "page"), vec!["2"]);
        assert_eq!(values(&query, "per_page"), vec!["50"]);
        assert!(values(&query, "c[]").contains(&"subject"));
    }

    #[test]
    fn test_adding_a_filter_only_adds_conditions() {
        let narrow = SearchIssuesParams {
            subject: Some("fire".to_string()),
            q: Some("printer".to_string()),
            ..Default::default()
        };
        let wide = SearchIssuesParams {
            subject: Some("fire".to_string()),
            ..Default::default()
        };
        let narrow = filters_for(&narrow).unwrap();
        let wide = filters_for(&wide).unwrap();
        assert!(wide.iter().all(|f| narrow.contains(f)));
        assert_eq!(narrow.len(), wide.len() + 1);
    }

    #[test]
    fn test_invalid_assignee_rejected() {
        let params = SearchIssuesParams {
            assigned_to_id: Some("John".to_string()),
            ..Default::default()
        };
        assert!(filters_for(&params).is_err());
    }

    #[test]
    fn test_paging() {
        assert_eq!(paging(0, 1, 25, false), (1, false));
        assert_eq!(paging(25, 1, 25, false), (1, false));
        assert_eq!(paging(26, 1, 25, false), (2, true));
        assert_eq!(paging(101, 5, 25, false), (5, false));
        assert_eq!(paging(10, 1, 25, true), (1, true));
    }
}
