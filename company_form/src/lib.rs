pub mod cookie;
pub mod validation;
pub mod wizard;

use serde::{Deserialize, Serialize};

pub use cookie::cookie_value;
pub use validation::{is_valid_email, is_valid_website, validate_field, validate_group, FieldError};
pub use wizard::{Controls, Issue, Step, StepErrors, Wizard};

/// Id of the select whose "Other" option reveals a free-text field.
pub const BRAND_TONE: &str = "brandTone";
pub const BRAND_TONE_OTHER: &str = "brandTone_other";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Textarea,
    Select,
    Email,
    Website,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Chosen upload, for `File` fields.
    #[serde(default)]
    pub file_name: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl Field {
    pub fn new(id: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            kind,
            required: false,
            value: String::new(),
            visible: true,
            file_name: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }
}

/// Checkboxes sharing a name; a required group needs at least one ticked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckboxGroup {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    pub options: Vec<String>,
    #[serde(default)]
    pub checked: Vec<String>,
}

impl CheckboxGroup {
    pub fn new<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            required: false,
            options: options.into_iter().map(Into::into).collect(),
            checked: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn set(&mut self, option: &str, checked: bool) -> bool {
        if !self.options.iter().any(|o| o == option) {
            return false;
        }
        self.checked.retain(|o| o != option);
        if checked {
            self.checked.push(option.to_string());
        }
        true
    }
}
