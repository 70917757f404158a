//! Input validation for carnet filters.
//!
//! Errors carry the offending field and a human suggestion so API clients can
//! point the user at what to change.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

lazy_static! {
    static ref GRADE_PATTERN: Regex =
        Regex::new(r"^[0-9A-Za-zÁÉÍÓÚÑáéíóúñ°º ]{1,20}$").expect("grade pattern is valid");
    static ref SECTION_PATTERN: Regex =
        Regex::new(r"^[0-9A-Za-zÑñ]{1,5}$").expect("section pattern is valid");
}

/// Validation error with detailed, user-friendly messages.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    pub message: String,
    /// Suggestion for how to fix the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn invalid_type(value: &str) -> Self {
        Self::new("type", format!("Tipo '{}' no es válido", value))
            .with_suggestion("Use uno de: all, student, teacher")
    }

    pub fn invalid_level(value: &str) -> Self {
        Self::new("level", format!("Nivel '{}' no es válido", value))
            .with_suggestion("Use uno de: INICIAL, PRIMARIA, SECUNDARIA o all")
    }

    pub fn invalid_grade(value: &str) -> Self {
        Self::new("grade", format!("Grado '{}' no es válido", value))
            .with_suggestion("Use hasta 20 letras o números, por ejemplo: 3")
    }

    pub fn invalid_section(value: &str) -> Self {
        Self::new("section", format!("Sección '{}' no es válida", value))
            .with_suggestion("Use hasta 5 letras o números, por ejemplo: A")
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, ". {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Collection of validation errors with formatted output.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

pub fn validate_grade(value: &str, errors: &mut ValidationErrors) {
    if !GRADE_PATTERN.is_match(value) {
        errors.add(ValidationError::invalid_grade(value));
    }
}

pub fn validate_section(value: &str, errors: &mut ValidationErrors) {
    if !SECTION_PATTERN.is_match(value) {
        errors.add(ValidationError::invalid_section(value));
    }
}
