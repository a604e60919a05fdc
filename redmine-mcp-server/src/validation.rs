//! Field validation against a discovered field set
//!
//! Every supplied value is checked by the rule of its field's [`FieldKind`]
//! and resolved to the exact value the form expects (option values rather than
//! labels, member IDs rather than names). Nothing is submitted unless the
//! whole map validates.

use crate::discovery::{FieldDefinition, FieldKind, TrackerFieldSet};
use crate::error::RedmineMcpError;
use crate::session::CurrentUser;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Why a single field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    UnknownField,
    MissingRequired,
    InvalidAssignee,
    InvalidOption,
    InvalidFormat,
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of validating one fields map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    pub errors: Vec<FieldError>,
    /// Canonical form values keyed by field id
    pub resolved: BTreeMap<String, Vec<String>>,
}

impl ValidationResult {
    /// Convert a failed validation into the error returned to callers
    pub fn into_error(self) -> RedmineMcpError {
        RedmineMcpError::validation(self.message)
    }
}

/// Validate caller values against a field set.
///
/// Keys resolve through [`TrackerFieldSet::resolve`]. Required fields that
/// are not supplied pass only when the form already carries a non-empty
/// default for them.
pub fn validate_fields(
    field_set: &TrackerFieldSet,
    fields: &Map<String, Value>,
    current_user: Option<&CurrentUser>,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut resolved = BTreeMap::new();

    for (key, value) in fields {
        let Some(field) = field_set.resolve(key) else {
            errors.push(FieldError::new(
                key,
                FieldErrorKind::UnknownField,
                format!(
                    "unknown field '{}' for project {} tracker {}",
                    key,
                    field_set.project_id,
                    field_set.tracker_id.as_deref().unwrap_or("default")
                ),
            ));
            continue;
        };

        match check_field(field, value, current_user) {
            Ok(values) => {
                resolved.insert(field.id.clone(), values);
            }
            Err(error) => errors.push(error),
        }
    }

    for field in field_set.required_fields() {
        if !field.visible || !field.enabled || resolved.contains_key(&field.id) {
            continue;
        }
        let supplied_but_invalid = errors.iter().any(|e| e.field == field.id);
        if !supplied_but_invalid && !field.has_default() {
            errors.push(FieldError::new(
                &field.id,
                FieldErrorKind::MissingRequired,
                format!("required field '{}' ({}) is missing", field.name, field.id),
            ));
        }
    }

    let valid = errors.is_empty();
    let message = if valid {
        format!("All {} field(s) are valid", resolved.len())
    } else {
        format!(
            "Validation failed: {}",
            errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        )
    };

    ValidationResult {
        valid,
        message,
        errors,
        resolved,
    }
}

fn check_field(
    field: &FieldDefinition,
    value: &Value,
    current_user: Option<&CurrentUser>,
) -> Result<Vec<String>, FieldError> {
    let values = scalar_values(value)
        .map_err(|m| FieldError::new(&field.id, FieldErrorKind::InvalidFormat, m))?;

    if !field.enabled {
        return Err(FieldError::new(
            &field.id,
            FieldErrorKind::ReadOnly,
            format!("field '{}' is read-only on this form", field.name),
        ));
    }

    if values.iter().all(|v| v.trim().is_empty()) {
        return clear_value(field);
    }

    match &field.kind {
        FieldKind::Assignee => single(field, &values).and_then(|v| assignee_rule(field, v, current_user)),
        FieldKind::Select { multiple: true } => values
            .iter()
            .filter(|v| !v.trim().is_empty())
            .map(|v| option_rule(field, v))
            .collect(),
        FieldKind::Select { multiple: false } | FieldKind::Radio => {
            single(field, &values).and_then(|v| option_rule(field, v).map(|v| vec![v]))
        }
        FieldKind::Checkbox => single(field, &values).and_then(|v| checkbox_rule(field, v)),
        FieldKind::Date => single(field, &values).and_then(|v| date_rule(field, v)),
        FieldKind::Number => single(field, &values).and_then(|v| number_rule(field, v)),
        FieldKind::IssueReference => single(field, &values).and_then(|v| issue_reference_rule(field, v)),
        FieldKind::Text | FieldKind::TextArea => single(field, &values).map(|v| vec![v.to_string()]),
    }
}

fn scalar_values(value: &Value) -> Result<Vec<String>, String> {
    fn scalar(value: &Value) -> Result<String, String> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            _ => Err("nested lists and objects are not supported".to_string()),
        }
    }

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(scalar).collect(),
        other => scalar(other).map(|v| vec![v]),
    }
}

fn single<'a>(field: &FieldDefinition, values: &'a [String]) -> Result<&'a str, FieldError> {
    match values {
        [one] => Ok(one.as_str()),
        _ => Err(FieldError::new(
            &field.id,
            FieldErrorKind::InvalidFormat,
            format!("field '{}' accepts a single value", field.name),
        )),
    }
}

fn clear_value(field: &FieldDefinition) -> Result<Vec<String>, FieldError> {
    if field.required {
        return Err(FieldError::new(
            &field.id,
            FieldErrorKind::MissingRequired,
            format!("required field '{}' ({}) cannot be empty", field.name, field.id),
        ));
    }
    match &field.kind {
        FieldKind::Select { multiple: true } => Ok(Vec::new()),
        FieldKind::Checkbox => Ok(vec!["0".to_string()]),
        FieldKind::Select { multiple: false } | FieldKind::Radio | FieldKind::Assignee
            if !field.options.iter().any(|o| o.value.is_empty()) =>
        {
            Err(FieldError::new(
                &field.id,
                FieldErrorKind::InvalidOption,
                format!("field '{}' has no empty choice and cannot be cleared", field.name),
            ))
        }
        _ => Ok(vec![String::new()]),
    }
}

fn assignee_rule(
    field: &FieldDefinition,
    value: &str,
    current_user: Option<&CurrentUser>,
) -> Result<Vec<String>, FieldError> {
    let value = value.trim();

    if value.eq_ignore_ascii_case("me") {
        let me = current_user
            .and_then(|u| u.id.clone())
            .or_else(|| {
                field
                    .options
                    .iter()
                    .find(|o| o.text.contains("<< me >>"))
                    .map(|o| o.value.clone())
            });
        return me.map(|id| vec![id]).ok_or_else(|| {
            FieldError::new(
                &field.id,
                FieldErrorKind::InvalidAssignee,
                "invalid assignee 'me': the current user is unknown",
            )
        });
    }

    let by_id = value.chars().all(|c| c.is_ascii_digit())
        && field.options.iter().any(|o| o.value == value);
    if by_id {
        return Ok(vec![value.to_string()]);
    }

    field
        .options
        .iter()
        .find(|o| !o.value.is_empty() && o.text.trim() == value)
        .map(|o| vec![o.value.clone()])
        .ok_or_else(|| {
            FieldError::new(
                &field.id,
                FieldErrorKind::InvalidAssignee,
                format!(
                    "invalid assignee '{}': not a member ID or name assignable in this project",
                    value
                ),
            )
        })
}

fn option_rule(field: &FieldDefinition, value: &str) -> Result<String, FieldError> {
    let value = value.trim();
    field
        .options
        .iter()
        .find(|o| o.value == value)
        .or_else(|| field.options.iter().find(|o| o.text.trim() == value))
        .map(|o| o.value.clone())
        .ok_or_else(|| {
            let allowed = field
                .options
                .iter()
                .filter(|o| !o.value.is_empty())
                .map(|o| format!("{} ({})", o.value, o.text))
                .collect::<Vec<_>>()
                .join(", ");
            FieldError::new(
                &field.id,
                FieldErrorKind::InvalidOption,
                format!(
                    "invalid value '{}' for '{}'; allowed: {}",
                    value, field.name, allowed
                ),
            )
        })
}

fn checkbox_rule(field: &FieldDefinition, value: &str) -> Result<Vec<String>, FieldError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(vec!["1".to_string()]),
        "0" | "false" | "no" | "off" => Ok(vec!["0".to_string()]),
        other => Err(FieldError::new(
            &field.id,
            FieldErrorKind::InvalidFormat,
            format!("field '{}' expects a boolean, got '{}'", field.name, other),
        )),
    }
}

fn date_rule(field: &FieldDefinition, value: &str) -> Result<Vec<String>, FieldError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| vec![value.to_string()])
        .map_err(|_| {
            FieldError::new(
                &field.id,
                FieldErrorKind::InvalidFormat,
                format!("field '{}' expects a YYYY-MM-DD date, got '{}'", field.name, value),
            )
        })
}

fn number_rule(field: &FieldDefinition, value: &str) -> Result<Vec<String>, FieldError> {
    let value = value.trim();
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(vec![value.to_string()]),
        _ => Err(FieldError::new(
            &field.id,
            FieldErrorKind::InvalidFormat,
            format!("field '{}' expects a number, got '{}'", field.name, value),
        )),
    }
}

fn issue_reference_rule(field: &FieldDefinition, value: &str) -> Result<Vec<String>, FieldError> {
    let trimmed = value.trim().trim_start_matches('#');
    trimmed
        .parse::<u64>()
        .map(|id| vec![id.to_string()])
        .map_err(|_| {
            FieldError::new(
                &field.id,
                FieldErrorKind::InvalidFormat,
                format!("field '{}' expects an issue number, got '{}'", field.name, value),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::tests::field_set;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn me() -> CurrentUser {
        CurrentUser {
            id: Some("5".to_string()),
            name: Some("jsmith".to_string()),
        }
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = validate_fields(
            &field_set(),
            &fields(json!({"invalid_field_name": "x", "subject": "ok", "cf_3": "ACME"})),
            None,
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, FieldErrorKind::UnknownField);
        assert!(result.message.contains("unknown field"));
    }

    #[test]
    fn test_missing_subject_fails_but_defaults_satisfy_others() {
        let result = validate_fields(&field_set(), &fields(json!({"cf_3": "ACME"})), None);
        assert!(!result.valid);
        let missing: Vec<&str> = result
            .errors
            .iter()
            .filter(|e| e.kind == FieldErrorKind::MissingRequired)
            .map(|e| e.field.as_str())
            .collect();
        assert_eq!(missing, vec!["issue_subject"]);

        let result = validate_fields(
            &field_set(),
            &fields(json!({"subject": "X", "priority_id": 2, "cf_3": "ACME"})),
            None,
        );
        assert!(result.valid, "{}", result.message);
        assert_eq!(result.resolved["issue_priority_id"], vec!["2"]);
    }

    #[test]
    fn test_assignee_me_resolves_to_session_user() {
        let result = validate_fields(
            &field_set(),
            &fields(json!({"subject": "X", "cf_3": "ACME", "assigned_to_id": "me"})),
            Some(&me()),
        );
        assert!(result.valid, "{}", result.message);
        assert_eq!(result.resolved["issue_assigned_to_id"], vec!["5"]);
    }

    #[test]
    fn test_assignee_by_name_and_invalid() {
        let set = field_set();
        let result = validate_fields(
            &set,
            &fields(json!({"subject": "X", "cf_3": "ACME", "assigned_to_id": "Jane Doe"})),
            None,
        );
        assert_eq!(result.resolved["issue_assigned_to_id"], vec!["7"]);

        let result = validate_fields(
            &set,
            &fields(json!({"subject": "X", "cf_3": "ACME", "assigned_to_id": "99"})),
            None,
        );
        assert!(!result.valid);
        assert_eq!(result.errors[0].kind, FieldErrorKind::InvalidAssignee);
        assert!(result.message.contains("invalid assignee"));
    }

    #[test]
    fn test_select_values_are_strict() {
        let set = field_set();
        let by_text = validate_fields(
            &set,
            &fields(json!({"subject": "X", "cf_3": "ACME", "priority_id": "High"})),
            None,
        );
        assert_eq!(by_text.resolved["issue_priority_id"], vec!["3"]);

        let bad = validate_fields(
            &set,
            &fields(json!({"subject": "X", "cf_3": "ACME", "priority_id": "Urgent"})),
            None,
        );
        assert!(!bad.valid);
        assert_eq!(bad.errors[0].kind, FieldErrorKind::InvalidOption);

        let multi = validate_fields(
            &set,
            &fields(json!({"subject": "X", "cf_3": "ACME", "cf_4": ["linux", "Mac"]})),
            None,
        );
        assert_eq!(multi.resolved["issue_custom_field_values_4"], vec!["linux", "mac"]);
    }

    #[test]
    fn test_format_rules() {
        let set = field_set();
        let result = validate_fields(
            &set,
            &fields(json!({
                "subject": "X",
                "cf_3": "ACME",
                "start_date": "2024-02-30",
                "parent_issue_id": "#12"
            })),
            None,
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "issue_start_date");
        assert_eq!(result.resolved["issue_parent_issue_id"], vec!["12"]);
    }

    #[test]
    fn test_required_field_cannot_be_cleared() {
        let result = validate_fields(
            &field_set(),
            &fields(json!({"subject": "", "cf_3": "ACME"})),
            None,
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, FieldErrorKind::MissingRequired);
    }
}
