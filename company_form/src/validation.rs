use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::{CheckboxGroup, Field, FieldKind, BRAND_TONE};

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").unwrap());

static URL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(https?://)?(www\.)?").unwrap());

static WEBSITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?)*\.[a-z]{2,}(/.*)?$",
    )
    .unwrap()
});

static LINKEDIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^linkedin\.com/(in|company)/[a-z0-9\-_]{3,100}(/.*)?$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("This field is required")]
    Required,
    #[error("Please select your brand's tone")]
    BrandToneRequired,
    #[error("Please upload a file")]
    FileRequired,
    #[error("Please enter a valid email address")]
    InvalidEmail,
    #[error("Please enter a valid website URL (example.com) or LinkedIn profile (linkedin.com/in/username)")]
    InvalidWebsite,
    #[error("Please select at least one option")]
    NoOptionSelected,
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL.is_match(value)
}

/// A bare domain (with optional path), or a LinkedIn person/company page.
/// Scheme and `www.` are ignored; empty input is allowed.
pub fn is_valid_website(url: &str) -> bool {
    if url.is_empty() {
        return true;
    }
    let lowered = url.to_lowercase();
    let clean = URL_PREFIX.replace(&lowered, "");
    WEBSITE.is_match(&clean) || LINKEDIN.is_match(&clean)
}

/// Hidden fields always pass.
pub fn validate_field(field: &Field) -> Result<(), FieldError> {
    if !field.visible {
        return Ok(());
    }

    let value = field.value.trim();
    if field.required && field.kind != FieldKind::File && value.is_empty() {
        return Err(if field.id == BRAND_TONE {
            FieldError::BrandToneRequired
        } else {
            FieldError::Required
        });
    }

    match field.kind {
        FieldKind::File if field.required && field.file_name.is_none() => {
            Err(FieldError::FileRequired)
        }
        FieldKind::Email if !value.is_empty() && !is_valid_email(&field.value) => {
            Err(FieldError::InvalidEmail)
        }
        FieldKind::Website if !is_valid_website(value) => Err(FieldError::InvalidWebsite),
        _ => Ok(()),
    }
}

pub fn validate_group(group: &CheckboxGroup) -> Result<(), FieldError> {
    if !group.required || group.options.is_empty() || !group.checked.is_empty() {
        Ok(())
    } else {
        Err(FieldError::NoOptionSelected)
    }
}
