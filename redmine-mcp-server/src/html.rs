//! HTML form snapshots and DOM helpers
//!
//! Redmine renders every editable surface as a plain HTML form. A
//! [`FormSnapshot`] captures one form's controls (with labels, visibility and
//! current values) as owned data so it can outlive the parsed document and be
//! refilled and submitted later.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css}: {e:?}"))
}

pub(crate) fn pattern(re: &'static str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| panic!("invalid built-in pattern {re}: {e}"))
}

static CONTROLS: LazyLock<Selector> = LazyLock::new(|| selector("input, select, textarea"));
static OPTIONS: LazyLock<Selector> = LazyLock::new(|| selector("option"));
static LABELS: LazyLock<Selector> = LazyLock::new(|| selector("label"));
static REQUIRED_MARK: LazyLock<Selector> = LazyLock::new(|| selector(".required, .req"));
static ERROR_ITEMS: LazyLock<Selector> =
    LazyLock::new(|| selector("#errorExplanation li, .errorExplanation li"));
static ERROR_BOX: LazyLock<Selector> =
    LazyLock::new(|| selector("#errorExplanation, .errorExplanation"));
static FLASH_ERROR: LazyLock<Selector> = LazyLock::new(|| selector("#flash_error, .flash.error"));
static META_CSRF: LazyLock<Selector> = LazyLock::new(|| selector("meta[name=\"csrf-token\"]"));

/// One `<option>` of a select, or one choice of a radio/checkbox group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
    #[serde(skip)]
    pub selected: bool,
}

/// A single `input`, `select` or `textarea` inside a form
#[derive(Debug, Clone)]
pub struct FormControl {
    /// `input`, `select` or `textarea`
    pub tag: String,
    /// Lowercased input type; `select` and `textarea` for those tags
    pub input_type: String,
    pub name: Option<String>,
    pub id: Option<String>,
    pub value: String,
    pub checked: bool,
    pub disabled: bool,
    pub multiple: bool,
    /// `required` attribute on the control itself
    pub required_attr: bool,
    /// Hidden through the `hidden` attribute or an ancestor's `display: none`
    pub hidden: bool,
    pub options: Vec<SelectOption>,
    /// Label text with required markers stripped
    pub label: Option<String>,
    /// The label carries `.required`/`.req` or an asterisk
    pub label_marked_required: bool,
    /// The immediate container has class `required`
    pub container_required: bool,
    pub css_class: Option<String>,
    pub placeholder: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
    pub rows: Option<String>,
    pub cols: Option<String>,
}

impl FormControl {
    /// Whether the control takes part in submission at all
    pub fn is_submittable(&self) -> bool {
        !self.disabled
            && self.name.is_some()
            && !matches!(
                self.input_type.as_str(),
                "submit" | "button" | "image" | "reset" | "file"
            )
    }

    /// Values this control contributes to a submission, in browser semantics
    pub fn current_values(&self) -> Vec<String> {
        match self.input_type.as_str() {
            "checkbox" | "radio" => {
                if self.checked {
                    let value = if self.value.is_empty() {
                        "on".to_string()
                    } else {
                        self.value.clone()
                    };
                    vec![value]
                } else {
                    Vec::new()
                }
            }
            "select" => {
                let selected: Vec<String> = self
                    .options
                    .iter()
                    .filter(|o| o.selected)
                    .map(|o| o.value.clone())
                    .collect();
                if selected.is_empty() && !self.multiple {
                    self.options
                        .first()
                        .map(|o| vec![o.value.clone()])
                        .unwrap_or_default()
                } else {
                    selected
                }
            }
            _ => vec![self.value.clone()],
        }
    }
}

/// Owned copy of an HTML form
#[derive(Debug, Clone)]
pub struct FormSnapshot {
    pub id: Option<String>,
    pub action: String,
    pub method: String,
    pub controls: Vec<FormControl>,
}

impl FormSnapshot {
    /// Snapshot the first form matching any of the given selectors, in order
    pub fn find(doc: &Html, candidates: &[&str]) -> Option<Self> {
        let labels = label_index(doc);
        candidates.iter().find_map(|css| {
            let sel = Selector::parse(css).ok()?;
            doc.select(&sel)
                .next()
                .map(|form| Self::from_element(form, &labels))
        })
    }

    fn from_element(form: ElementRef<'_>, labels: &HashMap<String, ElementRef<'_>>) -> Self {
        let controls = form
            .select(&CONTROLS)
            .map(|el| read_control(el, labels))
            .collect();

        Self {
            id: form.value().attr("id").map(str::to_string),
            action: form.value().attr("action").unwrap_or_default().to_string(),
            method: form
                .value()
                .attr("method")
                .unwrap_or("get")
                .to_lowercase(),
            controls,
        }
    }

    /// All controls sharing a `name`, in document order
    pub fn controls_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FormControl> {
        self.controls
            .iter()
            .filter(move |c| c.name.as_deref() == Some(name))
    }

    pub fn control_by_id(&self, id: &str) -> Option<&FormControl> {
        self.controls.iter().find(|c| c.id.as_deref() == Some(id))
    }

    /// The Rails CSRF token carried by the form
    pub fn csrf_token(&self) -> Option<String> {
        self.controls_named("authenticity_token")
            .next()
            .map(|c| c.value.clone())
            .filter(|v| !v.is_empty())
    }

    /// Name/value pairs a browser would submit, excluding buttons
    pub fn successful_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for control in self.controls.iter().filter(|c| c.is_submittable()) {
            if let Some(name) = &control.name {
                for value in control.current_values() {
                    pairs.push((name.clone(), value));
                }
            }
        }
        pairs
    }

    /// Submission pairs followed by the named submit button, if the form has one
    pub fn pairs_with_submit(&self, button: &str) -> Vec<(String, String)> {
        let mut pairs = self.successful_pairs();
        if let Some(submit) = self
            .controls_named(button)
            .find(|c| c.input_type == "submit")
        {
            pairs.push((button.to_string(), submit.value.clone()));
        }
        pairs
    }

    /// Replace the values of every visible control named `name`.
    ///
    /// Hidden companions (Rails' unchecked-checkbox inputs, empty multi-select
    /// placeholders) are left untouched. Returns whether any control changed.
    pub fn set_values(&mut self, name: &str, values: &[String]) -> bool {
        let mut touched = false;
        for control in self
            .controls
            .iter_mut()
            .filter(|c| c.name.as_deref() == Some(name))
        {
            match control.input_type.as_str() {
                "hidden" | "submit" | "button" | "image" | "reset" | "file" => {}
                "checkbox" | "radio" => {
                    control.checked = values.iter().any(|v| *v == control.value);
                    touched = true;
                }
                "select" => {
                    for option in &mut control.options {
                        option.selected = values.contains(&option.value);
                    }
                    touched = true;
                }
                _ => {
                    control.value = values.first().cloned().unwrap_or_default();
                    touched = true;
                }
            }
        }
        touched
    }

    /// Value of the option currently selected in the select with this id
    pub fn selected_value(&self, id: &str) -> Option<String> {
        self.control_by_id(id)
            .and_then(|c| c.current_values().into_iter().next())
    }
}

fn label_index<'a>(doc: &'a Html) -> HashMap<String, ElementRef<'a>> {
    let mut labels = HashMap::new();
    for label in doc.select(&LABELS) {
        if let Some(target) = label.value().attr("for") {
            labels.entry(target.to_string()).or_insert(label);
        }
    }
    labels
}

fn read_control(el: ElementRef<'_>, labels: &HashMap<String, ElementRef<'_>>) -> FormControl {
    let element = el.value();
    let tag = element.name().to_lowercase();
    let input_type = match tag.as_str() {
        "select" => "select".to_string(),
        "textarea" => "textarea".to_string(),
        _ => element.attr("type").unwrap_or("text").to_lowercase(),
    };
    let id = element.attr("id").map(str::to_string);
    let attr = |name: &str| element.attr(name).map(str::to_string);

    let value = if tag == "textarea" {
        el.text().collect::<String>()
    } else {
        element.attr("value").unwrap_or_default().to_string()
    };

    let options = if tag == "select" {
        el.select(&OPTIONS)
            .map(|o| {
                let text = text_of(o);
                SelectOption {
                    value: o.value().attr("value").map(str::to_string).unwrap_or_else(|| text.clone()),
                    text,
                    selected: o.value().attr("selected").is_some(),
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    let parent = el.parent().and_then(ElementRef::wrap);
    let label_el = id
        .as_deref()
        .and_then(|id| labels.get(id).copied())
        .or_else(|| parent.filter(|p| p.value().name() == "label"))
        .or_else(|| parent.and_then(|p| p.select(&LABELS).next()));

    let (label, label_marked_required) = match label_el {
        Some(label_el) => {
            let raw = text_of(label_el);
            let marked = raw.contains('*') || label_el.select(&REQUIRED_MARK).next().is_some();
            let cleaned = raw.replace('*', "").trim().to_string();
            ((!cleaned.is_empty()).then_some(cleaned), marked)
        }
        None => (None, false),
    };

    let container_required = parent
        .map(|p| p.value().classes().any(|c| c == "required"))
        .unwrap_or(false);

    FormControl {
        tag,
        input_type,
        name: attr("name"),
        id,
        value,
        checked: element.attr("checked").is_some(),
        disabled: element.attr("disabled").is_some(),
        multiple: element.attr("multiple").is_some(),
        required_attr: element.attr("required").is_some(),
        hidden: is_hidden(el),
        options,
        label,
        label_marked_required,
        container_required,
        css_class: attr("class"),
        placeholder: attr("placeholder"),
        min: attr("min"),
        max: attr("max"),
        rows: attr("rows"),
        cols: attr("cols"),
    }
}

fn is_hidden(el: ElementRef<'_>) -> bool {
    if el.value().attr("hidden").is_some() {
        return true;
    }
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|node| {
            node.value()
                .attr("style")
                .map(|style| {
                    style
                        .chars()
                        .filter(|c| !c.is_whitespace())
                        .collect::<String>()
                        .to_lowercase()
                        .contains("display:none")
                })
                .unwrap_or(false)
        })
}

/// Text content with whitespace collapsed
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Messages listed in a Rails `#errorExplanation` box
pub fn error_messages(doc: &Html) -> Vec<String> {
    let items: Vec<String> = doc
        .select(&ERROR_ITEMS)
        .map(text_of)
        .filter(|m| !m.is_empty())
        .collect();
    if !items.is_empty() {
        return items;
    }
    doc.select(&ERROR_BOX)
        .map(text_of)
        .filter(|m| !m.is_empty())
        .collect()
}

/// The error flash, e.g. "Invalid user or password"
pub fn flash_error(doc: &Html) -> Option<String> {
    doc.select(&FLASH_ERROR)
        .map(text_of)
        .find(|m| !m.is_empty())
}

/// CSRF token published in the page head
pub fn meta_csrf_token(doc: &Html) -> Option<String> {
    doc.select(&META_CSRF)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(str::to_string)
}
