//! Tools module for the Redmine MCP Server
//!
//! Contains all the MCP tools that drive the Redmine web UI on behalf of an agent.
//! Every tool result carries `success` and `message`; recoverable failures are
//! reported through those fields, while browser-level failures propagate as
//! MCP errors.

pub mod create_issue;
pub mod issue_details;
pub mod projects;
pub mod search_issues;
pub mod server_info;
pub mod session_tools;
pub mod time_entries;
pub mod trackers;
pub mod update_issue;
pub mod validate_fields;

pub use create_issue::*;
pub use issue_details::*;
pub use projects::*;
pub use search_issues::*;
pub use server_info::*;
pub use session_tools::*;
pub use time_entries::*;
pub use trackers::*;
pub use update_issue::*;
pub use validate_fields::*;

use crate::error::{RedmineMcpError, RedmineMcpResult};
use tracing::warn;

/// A tool result that can report a failure in-band
pub trait ToolOutcome {
    fn failure(message: String) -> Self;
}

/// Turn recoverable errors into a `success: false` result.
///
/// Only errors that leave the browser unusable are passed through.
pub(crate) fn settle<T: ToolOutcome>(operation: &str, result: RedmineMcpResult<T>) -> RedmineMcpResult<T> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("{} failed: {}", operation, e);
            Ok(T::failure(e.to_string()))
        }
    }
}

/// A project identifier or numeric project ID, safe to put in a URL path
pub(crate) fn project_identifier(parameter: &str, value: &str) -> RedmineMcpResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RedmineMcpError::invalid_param(
            parameter,
            "Project ID is required. Use get_projects to list the projects you can access.",
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RedmineMcpError::invalid_param(
            parameter,
            format!(
                "'{}' is not a project identifier. Identifiers contain only letters, digits, '-' and '_'.",
                value
            ),
        ));
    }
    Ok(value.to_string())
}

/// A numeric ID such as an issue, tracker or user ID; a leading `#` is accepted
pub(crate) fn numeric_id(parameter: &str, value: &str) -> RedmineMcpResult<String> {
    let value = value.trim().trim_start_matches('#');
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(RedmineMcpError::invalid_param(
            parameter,
            format!("'{}' is not a numeric ID", value),
        ));
    }
    Ok(value.to_string())
}

/// 1-based page number of a list view; defaults to the first page
pub(crate) fn page_number(page: Option<u32>) -> RedmineMcpResult<u32> {
    match page.unwrap_or(1) {
        0 => Err(RedmineMcpError::invalid_param("page", "Pages start at 1")),
        page => Ok(page),
    }
}
