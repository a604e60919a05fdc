//! Tracker field discovery
//!
//! Required fields and custom fields differ per tracker and are not described
//! by any static schema, so the field set is read from the rendered issue
//! form each time. Switching trackers re-renders the form; discovery polls
//! until the form reports the requested tracker as selected and never returns
//! the field set of a different tracker.

use crate::browser::Page;
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::html::{FormControl, FormSnapshot, SelectOption};
use crate::session::RedmineSession;
use crate::wait::Poller;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};
use url::Url;

/// Form selectors tried in order when locating the issue form
pub const ISSUE_FORM_SELECTORS: &[&str] = &[
    "form#issue-form",
    "form.new_issue",
    "form.edit_issue",
    "#content form[action*=\"/issues\"]",
];

pub const TRACKER_SELECT_ID: &str = "issue_tracker_id";
pub const STATUS_SELECT_ID: &str = "issue_status_id";

const CUSTOM_FIELD_PREFIX: &str = "issue_custom_field_values_";

/// Kind of value a field accepts; each kind has one validation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    TextArea,
    Date,
    Number,
    Checkbox,
    Radio,
    Select { multiple: bool },
    /// The assignee select; accepts member IDs, member names or `me`
    Assignee,
    /// Numeric issue ID such as the parent task
    IssueReference,
}

/// One discovered form field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// DOM id, e.g. `issue_subject` or `issue_custom_field_values_5`
    pub id: String,
    /// Label as rendered, without required markers
    pub name: String,
    /// Form parameter name, e.g. `issue[subject]`
    pub html_name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub visible: bool,
    pub enabled: bool,
    pub custom: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cols: Option<String>,
}

impl FieldDefinition {
    /// `subject` for `issue_subject`
    pub fn short_name(&self) -> &str {
        self.id.strip_prefix("issue_").unwrap_or(&self.id)
    }

    /// Custom field number for `issue_custom_field_values_<n>`
    pub fn custom_field_number(&self) -> Option<&str> {
        self.id.strip_prefix(CUSTOM_FIELD_PREFIX)
    }

    pub fn has_default(&self) -> bool {
        self.default_value
            .as_deref()
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

/// The fields of one (project, tracker) issue form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerFieldSet {
    pub project_id: String,
    /// Tracker the form was rendered for
    pub tracker_id: Option<String>,
    pub tracker_options: Vec<SelectOption>,
    pub fields: Vec<FieldDefinition>,
}

impl TrackerFieldSet {
    /// Build the field set from an issue form snapshot
    pub fn from_form(project_id: &str, form: &FormSnapshot) -> Self {
        let mut fields: Vec<FieldDefinition> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for control in form.controls.iter().filter(|c| is_discoverable(c)) {
            let Some(html_name) = control.name.clone() else {
                continue;
            };
            let grouped = is_grouped(control);
            let id = if grouped {
                name_to_id(&html_name)
            } else {
                control.id.clone().unwrap_or_else(|| name_to_id(&html_name))
            };

            if let Some(&position) = index.get(&id) {
                if grouped {
                    let field = &mut fields[position];
                    field.options.push(choice_of(control));
                    field.visible |= !control.hidden;
                    field.required |= is_required(control);
                    field.default_value = merge_default(field.default_value.take(), control);
                }
                continue;
            }

            let mut field = FieldDefinition {
                name: if grouped {
                    fallback_label(&id)
                } else {
                    control.label.clone().unwrap_or_else(|| fallback_label(&id))
                },
                kind: classify(control),
                required: is_required(control),
                visible: !control.hidden,
                enabled: !control.disabled,
                custom: id.contains("custom_field"),
                default_value: None,
                options: control.options.clone(),
                placeholder: control.placeholder.clone(),
                min: control.min.clone(),
                max: control.max.clone(),
                rows: control.rows.clone(),
                cols: control.cols.clone(),
                id: id.clone(),
                html_name,
            };
            if grouped {
                field.options = vec![choice_of(control)];
            }
            field.default_value = merge_default(None, control);

            debug!(
                "Found field: {} ({:?}) - Required: {}",
                field.name, field.kind, field.required
            );
            index.insert(id, fields.len());
            fields.push(field);
        }

        let tracker_options = form
            .control_by_id(TRACKER_SELECT_ID)
            .map(|c| c.options.clone())
            .unwrap_or_default();

        Self {
            project_id: project_id.to_string(),
            tracker_id: form.selected_value(TRACKER_SELECT_ID),
            tracker_options,
            fields,
        }
    }

    pub fn field(&self, id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Resolve a caller-supplied key: exact id, short name (`subject`), or
    /// custom field alias (`cf_5`).
    pub fn resolve(&self, key: &str) -> Option<&FieldDefinition> {
        let key = key.trim();
        if let Some(field) = self.field(key) {
            return Some(field);
        }
        let number = key
            .strip_prefix("cf_")
            .or_else(|| key.strip_prefix("custom_field_"))
            .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
        if let Some(number) = number {
            return self.field(&format!("{}{}", CUSTOM_FIELD_PREFIX, number));
        }
        self.field(&format!("issue_{}", key))
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn optional_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| !f.required)
    }

    pub fn custom_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.custom)
    }

    pub fn standard_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| !f.custom)
    }

    /// Whether `tracker` is offered by the form's tracker select
    pub fn offers_tracker(&self, tracker: &str) -> bool {
        self.tracker_options.iter().any(|o| o.value == tracker)
    }
}

fn is_discoverable(control: &FormControl) -> bool {
    if matches!(
        control.input_type.as_str(),
        "hidden" | "submit" | "button" | "image" | "reset" | "file"
    ) {
        return false;
    }
    let name = control.name.as_deref().unwrap_or_default();
    let id = control.id.as_deref().unwrap_or_default();
    if name.is_empty() && id.is_empty() {
        return false;
    }
    !(matches!(name, "authenticity_token" | "utf8" | "_method" | "back_url" | "commit")
        || id.starts_with("utf8")
        || id.starts_with("authenticity_token")
        || id.starts_with("commit"))
}

/// Radio buttons and checkbox lists form one field per parameter name
fn is_grouped(control: &FormControl) -> bool {
    control.input_type == "radio"
        || (control.input_type == "checkbox"
            && control.name.as_deref().is_some_and(|n| n.ends_with("[]")))
}

fn is_required(control: &FormControl) -> bool {
    control.required_attr || control.label_marked_required || control.container_required
}

fn classify(control: &FormControl) -> FieldKind {
    let id = control.id.as_deref().unwrap_or_default();
    let name = control.name.as_deref().unwrap_or_default();
    let css = control.css_class.as_deref().unwrap_or_default();

    match control.input_type.as_str() {
        "select" if id == "issue_assigned_to_id" || name.ends_with("[assigned_to_id]") => {
            FieldKind::Assignee
        }
        "select" => FieldKind::Select {
            multiple: control.multiple,
        },
        "textarea" => FieldKind::TextArea,
        "checkbox" if is_grouped(control) => FieldKind::Select { multiple: true },
        "checkbox" => FieldKind::Checkbox,
        "radio" => FieldKind::Radio,
        "date" => FieldKind::Date,
        "number" => FieldKind::Number,
        _ if id == "issue_parent_issue_id" || name.ends_with("[parent_issue_id]") => {
            FieldKind::IssueReference
        }
        _ if css.split_whitespace().any(|c| c == "date") || id.ends_with("_date") => {
            FieldKind::Date
        }
        _ => FieldKind::Text,
    }
}

fn choice_of(control: &FormControl) -> SelectOption {
    SelectOption {
        value: control.value.clone(),
        text: control
            .label
            .clone()
            .unwrap_or_else(|| control.value.clone()),
        selected: control.checked,
    }
}

fn merge_default(existing: Option<String>, control: &FormControl) -> Option<String> {
    let values: Vec<String> = control
        .current_values()
        .into_iter()
        .filter(|v| !v.is_empty())
        .collect();
    match (existing, values.is_empty()) {
        (existing, true) => existing,
        (Some(existing), false) => Some(format!("{},{}", existing, values.join(","))),
        (None, false) => Some(values.join(",")),
    }
}

/// Rails-style DOM id for a parameter name: `issue[custom_field_values][5][]`
/// becomes `issue_custom_field_values_5`
pub fn name_to_id(name: &str) -> String {
    name.replace("][", "_")
        .replace('[', "_")
        .replace(']', "")
        .trim_matches('_')
        .to_string()
}

fn fallback_label(id: &str) -> String {
    id.trim_start_matches("issue_")
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// An issue form ready to be filled, with the field set it was read from
#[derive(Debug, Clone)]
pub struct DiscoveredForm {
    pub field_set: TrackerFieldSet,
    pub form: FormSnapshot,
    pub page_url: Url,
}

fn read_issue_form(page: &Page, project_id: Option<&str>) -> Option<DiscoveredForm> {
    let form = FormSnapshot::find(&page.document(), ISSUE_FORM_SELECTORS)?;
    let project = project_id
        .map(str::to_string)
        .or_else(|| form.selected_value("issue_project_id"))
        .unwrap_or_default();
    Some(DiscoveredForm {
        field_set: TrackerFieldSet::from_form(&project, &form),
        form,
        page_url: page.url.clone(),
    })
}

fn tracker_query(tracker_id: Option<&str>) -> Vec<(String, String)> {
    tracker_id
        .map(|t| vec![("issue[tracker_id]".to_string(), t.to_string())])
        .unwrap_or_default()
}

async fn load_issue_form(
    session: &mut RedmineSession,
    url: &str,
    resource: &str,
    key: &str,
    project_id: Option<&str>,
    tracker_id: Option<&str>,
) -> RedmineMcpResult<DiscoveredForm> {
    let query = tracker_query(tracker_id);
    let wait = session.config().field_discovery_timeout();
    let mut poller = Poller::new(wait, session.config().poll_interval());
    let mut last_seen: Option<String> = None;

    while poller.next_attempt().await {
        let page = session.open(url, &query).await?;
        page.ensure_found(resource, key)?;

        let discovered = read_issue_form(&page, project_id).ok_or_else(|| {
            RedmineMcpError::permission(format!(
                "No issue form on {} for {} '{}' (missing permission or no trackers enabled)",
                page.url, resource, key
            ))
        })?;

        let Some(wanted) = tracker_id else {
            return Ok(discovered);
        };

        if !discovered.field_set.offers_tracker(wanted) {
            return Err(RedmineMcpError::not_found(
                "tracker",
                format!("{} (not enabled for {} '{}')", wanted, resource, key),
            ));
        }

        if discovered.field_set.tracker_id.as_deref() == Some(wanted) {
            debug!(
                "Tracker {} confirmed after {} attempt(s)",
                wanted,
                poller.attempts()
            );
            return Ok(discovered);
        }

        debug!(
            "Form still shows tracker {:?}, waiting for tracker {}",
            discovered.field_set.tracker_id, wanted
        );
        last_seen = discovered.field_set.tracker_id;
    }

    Err(RedmineMcpError::validation(format!(
        "Issue form did not switch to tracker {} within {}s (still showing tracker {})",
        tracker_id.unwrap_or_default(),
        wait.as_secs(),
        last_seen.as_deref().unwrap_or("none")
    )))
}

/// Discover the new-issue form of a project, optionally for a given tracker
#[instrument(skip(session))]
pub async fn discover_new_issue_form(
    session: &mut RedmineSession,
    project_id: &str,
    tracker_id: Option<&str>,
) -> RedmineMcpResult<DiscoveredForm> {
    let url = session.url(&format!("/projects/{}/issues/new", project_id));
    let discovered =
        load_issue_form(session, &url, "project", project_id, Some(project_id), tracker_id).await?;
    info!(
        "Discovered {} fields for project {} tracker {:?}",
        discovered.field_set.fields.len(),
        project_id,
        discovered.field_set.tracker_id
    );
    Ok(discovered)
}

/// Discover the edit form of an issue, optionally switching its tracker
#[instrument(skip(session))]
pub async fn discover_edit_form(
    session: &mut RedmineSession,
    issue_id: &str,
    tracker_id: Option<&str>,
) -> RedmineMcpResult<DiscoveredForm> {
    let url = session.url(&format!("/issues/{}/edit", issue_id));
    let discovered = load_issue_form(session, &url, "issue", issue_id, None, tracker_id).await?;
    info!(
        "Discovered {} editable fields for issue {}",
        discovered.field_set.fields.len(),
        issue_id
    );
    Ok(discovered)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use scraper::Html;

    pub(crate) const NEW_ISSUE_FORM: &str = r#"
      <form id="issue-form" class="new_issue" action="/projects/demo/issues" method="post">
        <input type="hidden" name="authenticity_token" value="t">
        <input type="hidden" name="form_update_triggered_by" value="">
        <p><label for="issue_tracker_id">Tracker<span class="required"> *</span></label>
          <select id="issue_tracker_id" name="issue[tracker_id]">
            <option value="1">Bug</option><option value="2" selected="selected">Feature</option>
          </select></p>
        <p><label for="issue_subject">Subject<span class="required"> *</span></label>
          <input id="issue_subject" name="issue[subject]" type="text"></p>
        <p><label for="issue_description">Description</label>
          <textarea id="issue_description" name="issue[description]" rows="10" cols="60"></textarea></p>
        <p><label for="issue_status_id">Status<span class="required"> *</span></label>
          <select id="issue_status_id" name="issue[status_id]"><option value="1" selected>New</option><option value="2">In Progress</option></select></p>
        <p><label for="issue_priority_id">Priority<span class="required"> *</span></label>
          <select id="issue_priority_id" name="issue[priority_id]"><option value="1">Low</option><option value="2" selected>Normal</option><option value="3">High</option></select></p>
        <p><label for="issue_assigned_to_id">Assignee</label>
          <select id="issue_assigned_to_id" name="issue[assigned_to_id]"><option value=""></option><option value="5">&lt;&lt; me &gt;&gt;</option><option value="5">John Smith</option><option value="7">Jane Doe</option></select></p>
        <p><label for="issue_parent_issue_id">Parent task</label>
          <input id="issue_parent_issue_id" name="issue[parent_issue_id]" type="text"></p>
        <p><label for="issue_start_date">Start date</label>
          <input id="issue_start_date" name="issue[start_date]" type="date" value="2024-05-01"></p>
        <p><label for="issue_estimated_hours">Estimated time</label>
          <input id="issue_estimated_hours" name="issue[estimated_hours]" type="text"></p>
        <p><label for="issue_custom_field_values_3"><span>Customer</span><span class="required"> *</span></label>
          <input id="issue_custom_field_values_3" name="issue[custom_field_values][3]" type="text"></p>
        <p><label>Platforms</label><span>
          <label class="inline"><input type="checkbox" name="issue[custom_field_values][4][]" value="linux"> Linux</label>
          <label class="inline"><input type="checkbox" name="issue[custom_field_values][4][]" value="mac"> Mac</label></span>
          <input type="hidden" name="issue[custom_field_values][4][]" value=""></p>
        <p><label>Severity</label><span>
          <label class="inline"><input type="radio" id="issue_custom_field_values_6_minor" name="issue[custom_field_values][6]" value="minor" checked> Minor</label>
          <label class="inline"><input type="radio" id="issue_custom_field_values_6_major" name="issue[custom_field_values][6]" value="major"> Major</label></span></p>
        <input type="submit" name="commit" value="Create">
      </form>"#;

    pub(crate) fn field_set() -> TrackerFieldSet {
        let doc = Html::parse_document(NEW_ISSUE_FORM);
        let form = FormSnapshot::find(&doc, ISSUE_FORM_SELECTORS).unwrap();
        TrackerFieldSet::from_form("demo", &form)
    }

    #[test]
    fn test_standard_required_fields() {
        let set = field_set();
        let required: Vec<&str> = set.required_fields().map(|f| f.id.as_str()).collect();
        for id in ["issue_subject", "issue_status_id", "issue_priority_id"] {
            assert!(required.contains(&id), "{} should be required", id);
        }
        assert!(!set.field("issue_description").unwrap().required);
    }

    #[test]
    fn test_skips_system_controls() {
        let set = field_set();
        assert!(set.field("authenticity_token").is_none());
        assert!(set.field("form_update_triggered_by").is_none());
        assert!(set.fields.iter().all(|f| f.html_name != "commit"));
    }

    #[test]
    fn test_field_kinds() {
        let set = field_set();
        assert_eq!(set.field("issue_assigned_to_id").unwrap().kind, FieldKind::Assignee);
        assert_eq!(set.field("issue_parent_issue_id").unwrap().kind, FieldKind::IssueReference);
        assert_eq!(set.field("issue_start_date").unwrap().kind, FieldKind::Date);
        assert_eq!(set.field("issue_description").unwrap().kind, FieldKind::TextArea);
        assert_eq!(
            set.field("issue_priority_id").unwrap().kind,
            FieldKind::Select { multiple: false }
        );
        assert_eq!(set.field("issue_subject").unwrap().kind, FieldKind::Text);
    }

    #[test]
    fn test_custom_fields_and_groups() {
        let set = field_set();
        let custom: Vec<&str> = set.custom_fields().map(|f| f.id.as_str()).collect();
        assert_eq!(
            custom,
            vec![
                "issue_custom_field_values_3",
                "issue_custom_field_values_4",
                "issue_custom_field_values_6"
            ]
        );

        let customer = set.field("issue_custom_field_values_3").unwrap();
        assert_eq!(customer.name, "Customer");
        assert!(customer.required);

        let platforms = set.field("issue_custom_field_values_4").unwrap();
        assert_eq!(platforms.kind, FieldKind::Select { multiple: true });
        let values: Vec<&str> = platforms.options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["linux", "mac"]);
        assert_eq!(platforms.options[1].text, "Mac");

        let severity = set.field("issue_custom_field_values_6").unwrap();
        assert_eq!(severity.kind, FieldKind::Radio);
        assert_eq!(severity.options.len(), 2);
        assert_eq!(severity.default_value.as_deref(), Some("minor"));
    }

    #[test]
    fn test_tracker_state_and_defaults() {
        let set = field_set();
        assert_eq!(set.tracker_id.as_deref(), Some("2"));
        assert!(set.offers_tracker("1"));
        assert!(!set.offers_tracker("9"));
        assert_eq!(set.field("issue_priority_id").unwrap().default_value.as_deref(), Some("2"));
        assert!(!set.field("issue_subject").unwrap().has_default());
        assert_eq!(set.field("issue_description").unwrap().rows.as_deref(), Some("10"));
    }

    #[test]
    fn test_resolve_aliases() {
        let set = field_set();
        assert_eq!(set.resolve("subject").unwrap().id, "issue_subject");
        assert_eq!(set.resolve("issue_subject").unwrap().id, "issue_subject");
        assert_eq!(set.resolve("priority_id").unwrap().id, "issue_priority_id");
        assert_eq!(set.resolve("cf_3").unwrap().id, "issue_custom_field_values_3");
        assert_eq!(
            set.resolve("custom_field_values_4").unwrap().id,
            "issue_custom_field_values_4"
        );
        assert!(set.resolve("invalid_field_name").is_none());
    }

    #[test]
    fn test_name_to_id() {
        assert_eq!(name_to_id("issue[subject]"), "issue_subject");
        assert_eq!(
            name_to_id("issue[custom_field_values][5][]"),
            "issue_custom_field_values_5"
        );
        assert_eq!(fallback_label("issue_custom_field_values_5"), "Custom Field Values 5");
    }
}
