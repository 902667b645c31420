use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::validation::{validate_field, validate_group, FieldError};
use crate::{CheckboxGroup, Field, BRAND_TONE, BRAND_TONE_OTHER};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub groups: Vec<CheckboxGroup>,
}

impl Step {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: CheckboxGroup) -> Self {
        self.groups.push(group);
        self
    }

    fn validate(&self) -> Result<(), StepErrors> {
        let mut issues: Vec<Issue> = self
            .fields
            .iter()
            .filter_map(|field| {
                validate_field(field).err().map(|error| Issue {
                    target: field.id.clone(),
                    error,
                })
            })
            .collect();
        issues.extend(self.groups.iter().filter_map(|group| {
            validate_group(group).err().map(|error| Issue {
                target: group.name.clone(),
                error,
            })
        }));

        if issues.is_empty() {
            Ok(())
        } else {
            Err(StepErrors { issues })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Field id or checkbox group name.
    pub target: String,
    pub error: FieldError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} field(s) need attention", issues.len())]
pub struct StepErrors {
    pub issues: Vec<Issue>,
}

impl StepErrors {
    /// Where focus should go: the first invalid field in step order.
    pub fn first_invalid(&self) -> Option<&str> {
        self.issues.first().map(|issue| issue.target.as_str())
    }

    pub fn error_for(&self, target: &str) -> Option<FieldError> {
        self.issues
            .iter()
            .find(|issue| issue.target == target)
            .map(|issue| issue.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub prev: bool,
    pub next: bool,
    pub submit: bool,
}

/// Multi-step form: moving forward requires the current step to be valid.
#[derive(Debug, Clone)]
pub struct Wizard {
    steps: Vec<Step>,
    current: usize,
}

impl Wizard {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, current: 0 }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.steps
            .iter()
            .flat_map(|step| step.fields.iter())
            .find(|field| field.id == id)
    }

    fn field_mut(&mut self, id: &str) -> Option<&mut Field> {
        self.steps
            .iter_mut()
            .flat_map(|step| step.fields.iter_mut())
            .find(|field| field.id == id)
    }

    /// Returns `false` when no field has that id. Choosing "Other" as the
    /// brand tone reveals and requires the free-text tone field.
    pub fn set_value(&mut self, id: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        let other_tone = id == BRAND_TONE && value == "Other";
        let Some(field) = self.field_mut(id) else {
            return false;
        };
        field.value = value;

        if id == BRAND_TONE {
            if let Some(other) = self.field_mut(BRAND_TONE_OTHER) {
                other.visible = other_tone;
                other.required = other_tone;
            }
        }
        true
    }

    pub fn attach_file(&mut self, id: &str, file_name: Option<String>) -> bool {
        match self.field_mut(id) {
            Some(field) => {
                field.file_name = file_name;
                true
            }
            None => false,
        }
    }

    pub fn toggle(&mut self, group: &str, option: &str, checked: bool) -> bool {
        self.steps
            .iter_mut()
            .flat_map(|step| step.groups.iter_mut())
            .find(|g| g.name == group)
            .is_some_and(|g| g.set(option, checked))
    }

    pub fn validate_current(&self) -> Result<(), StepErrors> {
        match self.steps.get(self.current) {
            Some(step) => step.validate(),
            None => Ok(()),
        }
    }

    /// Advances one step if the current one is valid. On the last step it stays put.
    pub fn next(&mut self) -> Result<usize, StepErrors> {
        if let Err(errors) = self.validate_current() {
            debug!(step = self.current, issues = errors.issues.len(), "step blocked");
            return Err(errors);
        }
        if self.current + 1 < self.steps.len() {
            self.current += 1;
        }
        Ok(self.current)
    }

    /// Going back never validates.
    pub fn prev(&mut self) -> usize {
        self.current = self.current.saturating_sub(1);
        self.current
    }

    /// Only offered on the last step; validates that step before accepting.
    pub fn submit(&self) -> Result<(), StepErrors> {
        self.validate_current()
    }

    pub fn progress_percent(&self) -> f32 {
        if self.steps.is_empty() {
            return 0.0;
        }
        (self.current + 1) as f32 / self.steps.len() as f32 * 100.0
    }

    /// Empty when there are no steps.
    pub fn indicator(&self) -> String {
        if self.steps.is_empty() {
            return String::new();
        }
        format!("Page {} of {}", self.current + 1, self.steps.len())
    }

    pub fn controls(&self) -> Controls {
        if self.steps.is_empty() {
            return Controls {
                prev: false,
                next: false,
                submit: false,
            };
        }
        let last = self.steps.len().saturating_sub(1);
        Controls {
            prev: self.current > 0,
            next: self.current < last,
            submit: self.current == last,
        }
    }
}
