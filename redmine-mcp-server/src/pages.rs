//! Extractors for Redmine list and detail pages
//!
//! Each function reads one kind of page into owned data. They never touch the
//! network, so they can be exercised directly against saved HTML.

use crate::html::{self, selector, text_of};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PROJECT_TABLE_ROWS: LazyLock<Selector> =
    LazyLock::new(|| selector("table.projects tbody tr, table.list tbody tr"));
static PROJECT_BOARD_LINKS: LazyLock<Selector> =
    LazyLock::new(|| selector("#projects-index a.project"));
static PROJECT_LINKS: LazyLock<Selector> = LazyLock::new(|| selector("#content a[href*='/projects/']"));
static CELLS: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static WIKI_DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| selector(".wiki.description, .description"));

static MEMBER_ROWS: LazyLock<Selector> =
    LazyLock::new(|| selector("#tab-content-members table tbody tr, table.members tbody tr"));
static MEMBER_NAME_LINK: LazyLock<Selector> =
    LazyLock::new(|| selector("td.name a[href*='/users/'], td.user a[href*='/users/'], a[href*='/users/']"));
static MEMBER_ROLES: LazyLock<Selector> = LazyLock::new(|| selector("td.roles"));
static MEMBERS_BOX_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("div.members.box p"));
static MEMBERS_BOX_ROLE: LazyLock<Selector> = LazyLock::new(|| selector("span.label"));
static USER_LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href*='/users/']"));

static ISSUE_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("table.list.issues tr.issue"));
static PAGINATION: LazyLock<Selector> =
    LazyLock::new(|| selector(".pagination, .paginator, .page-info, .items-info, .pagination .items"));
static NEXT_PAGE: LazyLock<Selector> =
    LazyLock::new(|| selector(".pagination li.next a, .pagination a.next, li.next.page a"));

static ISSUE_SUBJECT: LazyLock<Selector> = LazyLock::new(|| selector(".subject h3"));
static ISSUE_HEADING: LazyLock<Selector> = LazyLock::new(|| selector("#content > h2"));
static ATTRIBUTES: LazyLock<Selector> = LazyLock::new(|| selector("div.attribute"));
static ATTRIBUTE_LABEL: LazyLock<Selector> = LazyLock::new(|| selector("div.label"));
static ATTRIBUTE_VALUE: LazyLock<Selector> = LazyLock::new(|| selector("div.value"));
static ISSUE_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector(".description .wiki, .issue-description .wiki"));
static ISSUE_AUTHOR: LazyLock<Selector> = LazyLock::new(|| selector("p.author"));
static AUTHOR_USER: LazyLock<Selector> = LazyLock::new(|| selector("a.user, a[href*='/users/']"));
static TIMESTAMP_LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[title]"));

static TIME_ENTRY_ROWS: LazyLock<Selector> =
    LazyLock::new(|| selector("table.list.time-entries tbody tr, #content table.list tbody tr"));

static PROJECT_HREF: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"/projects/([^/?#]+)/?$"));
static USER_HREF: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"/users/(\d+)"));
static ISSUE_HREF: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"/issues/(\d+)"));
static ISSUE_NUMBER: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"#(\d+)"));
static TOTAL_COUNT: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"\(?\d+-\d+/(\d+)\)?"));
static TRACKER_HEADING: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"^([^#]+?)\s*#\d+"));
static CUSTOM_FIELD_CLASS: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"^cf_(\d+)$"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project identifier as used in URLs
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: Option<String>,
    pub name: String,
    pub roles: Vec<String>,
    pub is_current_user: bool,
}

/// One row of the issue list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRow {
    pub id: String,
    pub url: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub spent_on: String,
    pub user: String,
    pub activity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub hours: String,
}

/// Paging information of a list view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Total from the `(1-25/101)` counter, when rendered
    pub total_count: Option<u64>,
    /// A "next page" link is present
    pub has_next_link: bool,
}

fn cell_text(row: ElementRef<'_>, class: &str) -> Option<String> {
    row.select(&CELLS)
        .find(|cell| cell.value().classes().any(|c| c == class))
        .map(text_of)
        .filter(|t| !t.is_empty())
}

fn absolute(base: &url::Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

fn push_project(
    projects: &mut Vec<ProjectInfo>,
    base: &url::Url,
    id: String,
    name: String,
    description: String,
    href: &str,
) {
    if !name.is_empty() && !projects.iter().any(|p| p.id == id) {
        projects.push(ProjectInfo {
            id,
            name,
            description,
            url: absolute(base, href),
        });
    }
}

/// Projects visible on the `/projects` page, in table, board or link form
pub fn parse_projects(doc: &Html, base: &url::Url) -> Vec<ProjectInfo> {
    let mut projects: Vec<ProjectInfo> = Vec::new();

    for row in doc.select(&PROJECT_TABLE_ROWS) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELLS).collect();
        let Some(link) = cells.first().and_then(|c| c.select(&LINK).next()) else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default();
        if let Some(id) = PROJECT_HREF.captures(href).and_then(|c| c.get(1)) {
            let description = cells.get(1).map(|c| text_of(*c)).unwrap_or_default();
            push_project(
                &mut projects,
                base,
                id.as_str().to_string(),
                text_of(link),
                description,
                href,
            );
        }
    }

    for link in doc.select(&PROJECT_BOARD_LINKS) {
        let href = link.value().attr("href").unwrap_or_default();
        if let Some(id) = PROJECT_HREF.captures(href).and_then(|c| c.get(1)) {
            let description = link
                .parent()
                .and_then(ElementRef::wrap)
                .and_then(|p| p.select(&WIKI_DESCRIPTION).next())
                .map(text_of)
                .unwrap_or_default();
            push_project(
                &mut projects,
                base,
                id.as_str().to_string(),
                text_of(link),
                description,
                href,
            );
        }
    }

    if projects.is_empty() {
        for link in doc.select(&PROJECT_LINKS) {
            let href = link.value().attr("href").unwrap_or_default();
            let name = text_of(link);
            let navigation = matches!(
                name.to_lowercase().as_str(),
                "projects" | "new project" | "settings"
            );
            if navigation || name.chars().count() < 2 || href.ends_with("/projects/new") {
                continue;
            }
            if let Some(id) = PROJECT_HREF.captures(href).and_then(|c| c.get(1)) {
                push_project(
                    &mut projects,
                    base,
                    id.as_str().to_string(),
                    name,
                    String::new(),
                    href,
                );
            }
        }
    }

    projects
}

/// Members from the project settings "Members" tab
pub fn parse_settings_members(doc: &Html, current_user_id: Option<&str>) -> Vec<MemberInfo> {
    let mut members = Vec::new();
    for row in doc.select(&MEMBER_ROWS) {
        let Some(link) = row.select(&MEMBER_NAME_LINK).next() else {
            continue;
        };
        let id = link
            .value()
            .attr("href")
            .and_then(|h| USER_HREF.captures(h))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let roles = row
            .select(&MEMBER_ROLES)
            .next()
            .or_else(|| row.select(&CELLS).nth(1))
            .map(text_of)
            .map(|t| split_roles(&t))
            .unwrap_or_default();

        members.push(MemberInfo {
            is_current_user: id.is_some() && id.as_deref() == current_user_id,
            id,
            name: text_of(link),
            roles,
        });
    }
    members
}

/// Members from the "Members" box on the project overview, grouped by role
pub fn parse_overview_members(doc: &Html, current_user_id: Option<&str>) -> Vec<MemberInfo> {
    let mut members: Vec<MemberInfo> = Vec::new();
    for row in doc.select(&MEMBERS_BOX_ROWS) {
        let role = row
            .select(&MEMBERS_BOX_ROLE)
            .next()
            .map(text_of)
            .map(|r| r.trim_end_matches(':').trim().to_string())
            .unwrap_or_default();

        for link in row.select(&USER_LINKS) {
            let id = link
                .value()
                .attr("href")
                .and_then(|h| USER_HREF.captures(h))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            let name = text_of(link);

            if let Some(existing) = members.iter_mut().find(|m| m.id == id && m.name == name) {
                if !role.is_empty() && !existing.roles.contains(&role) {
                    existing.roles.push(role.clone());
                }
                continue;
            }
            members.push(MemberInfo {
                is_current_user: id.is_some() && id.as_deref() == current_user_id,
                id,
                name,
                roles: if role.is_empty() { Vec::new() } else { vec![role.clone()] },
            });
        }
    }
    members
}

fn split_roles(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rows of the issue list table
pub fn parse_issue_rows(doc: &Html, base: &url::Url) -> Vec<IssueRow> {
    let mut rows = Vec::new();
    for row in doc.select(&ISSUE_ROWS) {
        let from_row_id = row
            .value()
            .attr("id")
            .and_then(|id| id.strip_prefix("issue-"))
            .map(str::to_string);
        let from_link = row
            .select(&LINK)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| ISSUE_HREF.captures(href).and_then(|c| c.get(1)))
            .map(|m| m.as_str().to_string());
        let Some(id) = from_row_id.or(from_link) else {
            continue;
        };

        let subject = cell_text(row, "subject").unwrap_or_else(|| format!("Issue #{}", id));
        rows.push(IssueRow {
            url: absolute(base, &format!("/issues/{}", id)),
            subject,
            project: cell_text(row, "project"),
            tracker: cell_text(row, "tracker"),
            status: cell_text(row, "status"),
            priority: cell_text(row, "priority"),
            assigned_to: cell_text(row, "assigned_to"),
            updated_on: cell_text(row, "updated_on"),
            id,
        });
    }
    rows
}

/// Counter and next-link state of a paginated list
pub fn parse_pagination(doc: &Html) -> Pagination {
    let total_count = doc
        .select(&PAGINATION)
        .map(text_of)
        .find_map(|text| {
            TOTAL_COUNT
                .captures(&text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
        });

    Pagination {
        total_count,
        has_next_link: doc.select(&NEXT_PAGE).next().is_some(),
    }
}

/// Every attribute of the issue page as a flat map.
///
/// Standard attributes are keyed by their CSS class (`status`, `assigned_to`,
/// `start_date`...), custom fields by their rendered label and additionally
/// collected under `custom_fields` as `cf_<id>`.
pub fn parse_issue_details(doc: &Html, issue_id: &str) -> Map<String, Value> {
    let mut issue = Map::new();
    issue.insert("id".to_string(), Value::String(issue_id.to_string()));

    if let Some(subject) = doc.select(&ISSUE_SUBJECT).next().map(text_of) {
        issue.insert("subject".to_string(), Value::String(subject));
    }

    if let Some(heading) = doc.select(&ISSUE_HEADING).next().map(text_of) {
        if let Some(tracker) = TRACKER_HEADING.captures(&heading).and_then(|c| c.get(1)) {
            issue.insert(
                "tracker".to_string(),
                Value::String(tracker.as_str().trim().to_string()),
            );
        }
    }

    let mut custom_fields = BTreeMap::new();
    for attribute in doc.select(&ATTRIBUTES) {
        let (Some(label), Some(value)) = (
            attribute.select(&ATTRIBUTE_LABEL).next().map(text_of),
            attribute.select(&ATTRIBUTE_VALUE).next().map(text_of),
        ) else {
            continue;
        };
        let label = label.trim_end_matches(':').trim().to_string();
        if label.is_empty() {
            continue;
        }

        let classes: Vec<&str> = attribute
            .value()
            .classes()
            .filter(|c| *c != "attribute")
            .collect();

        if let Some(cf) = classes
            .iter()
            .find_map(|c| CUSTOM_FIELD_CLASS.captures(c).and_then(|m| m.get(1)))
        {
            custom_fields.insert(format!("cf_{}", cf.as_str()), Value::String(value.clone()));
            issue.insert(label, Value::String(value));
        } else if let Some(class) = classes.first() {
            issue.insert(class.replace('-', "_"), Value::String(value));
        } else {
            issue.insert(label, Value::String(value));
        }
    }
    issue.insert(
        "custom_fields".to_string(),
        Value::Object(custom_fields.into_iter().collect()),
    );

    if let Some(description) = doc.select(&ISSUE_DESCRIPTION).next() {
        let text = description
            .text()
            .collect::<String>()
            .trim()
            .to_string();
        issue.insert("description".to_string(), Value::String(text));
    }

    if let Some(author_line) = doc.select(&ISSUE_AUTHOR).next() {
        if let Some(author) = author_line.select(&AUTHOR_USER).next().map(text_of) {
            issue.insert("author".to_string(), Value::String(author));
        }
        let mut stamps = author_line
            .select(&TIMESTAMP_LINKS)
            .filter_map(|a| a.value().attr("title"))
            .map(str::to_string);
        if let Some(created) = stamps.next() {
            issue.insert("created_on".to_string(), Value::String(created));
        }
        if let Some(updated) = stamps.next() {
            issue.insert("updated_on".to_string(), Value::String(updated));
        }
    }

    issue
}

/// Rows of the spent time list
pub fn parse_time_entries(doc: &Html) -> Vec<TimeEntry> {
    doc.select(&TIME_ENTRY_ROWS)
        .filter(|row| !row.value().classes().any(|c| c == "total"))
        .filter_map(|row| {
            let spent_on = cell_text(row, "spent_on")?;
            let issue = cell_text(row, "issue");
            let issue_id = issue
                .as_deref()
                .and_then(|t| ISSUE_NUMBER.captures(t))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            Some(TimeEntry {
                spent_on,
                user: cell_text(row, "user").unwrap_or_default(),
                activity: cell_text(row, "activity").unwrap_or_default(),
                issue,
                issue_id,
                comments: cell_text(row, "comments"),
                hours: cell_text(row, "hours").unwrap_or_default(),
            })
        })
        .collect()
}
