use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use super::validation::{validate_grade, validate_section, ValidationError, ValidationErrors};
use crate::people::{EducationLevel, KindFilter, PersonFilter};

/// Filters as submitted by a client. Every field is optional and `"all"`
/// means "no constraint".
#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CarnetFilters {
    /// One of `all`, `student`, `teacher`.
    #[serde(rename = "type", default)]
    #[schema(example = "student")]
    pub kind: Option<String>,
    #[schema(example = "PRIMARIA")]
    pub level: Option<String>,
    #[schema(example = "3")]
    pub grade: Option<String>,
    #[schema(example = "A")]
    pub section: Option<String>,
}

/// `None`, empty, and `"all"` all mean unconstrained.
fn constraint(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

impl CarnetFilters {
    pub fn normalize(&self) -> Result<PersonFilter, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let kind = match constraint(&self.kind) {
            None => KindFilter::All,
            Some(v) if v.eq_ignore_ascii_case("student") => KindFilter::Student,
            Some(v) if v.eq_ignore_ascii_case("teacher") => KindFilter::Teacher,
            Some(v) => {
                errors.add(ValidationError::invalid_type(v));
                KindFilter::All
            }
        };

        let level = match constraint(&self.level) {
            None => None,
            Some(v) => match v.parse::<EducationLevel>() {
                Ok(level) => Some(level),
                Err(_) => {
                    errors.add(ValidationError::invalid_level(v));
                    None
                }
            },
        };

        let grade = constraint(&self.grade).map(str::to_string);
        if let Some(grade) = &grade {
            validate_grade(grade, &mut errors);
        }

        let section = constraint(&self.section).map(str::to_string);
        if let Some(section) = &section {
            validate_section(section, &mut errors);
        }

        errors.into_result()?;

        Ok(PersonFilter {
            kind,
            level,
            grade,
            section,
        })
    }
}
