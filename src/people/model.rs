use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PersonKind {
    Student,
    Teacher,
}

impl PersonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonKind::Student => "student",
            PersonKind::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EducationLevel {
    Inicial,
    Primaria,
    Secundaria,
}

impl EducationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EducationLevel::Inicial => "INICIAL",
            EducationLevel::Primaria => "PRIMARIA",
            EducationLevel::Secundaria => "SECUNDARIA",
        }
    }
}

impl fmt::Display for EducationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EducationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INICIAL" => Ok(EducationLevel::Inicial),
            "PRIMARIA" => Ok(EducationLevel::Primaria),
            "SECUNDARIA" => Ok(EducationLevel::Secundaria),
            other => Err(format!("unknown education level '{}'", other)),
        }
    }
}

/// Identifies a person across the student/teacher union.
///
/// The derived ordering (students first, then id ascending) is the order cards
/// are printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonKey {
    pub kind: PersonKind,
    pub id: i64,
}

impl PersonKey {
    pub fn student(id: i64) -> Self {
        Self {
            kind: PersonKind::Student,
            id,
        }
    }

    pub fn teacher(id: i64) -> Self {
        Self {
            kind: PersonKind::Teacher,
            id,
        }
    }
}

impl fmt::Display for PersonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.as_str(), self.id)
    }
}

/// Read-only projection of a student or teacher used to print a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: i64,
    pub kind: PersonKind,
    pub tenant_id: TenantId,
    pub level: Option<EducationLevel>,
    pub grade: Option<String>,
    pub section: Option<String>,
    pub full_name: Option<String>,
    pub document_number: Option<String>,
    /// Card code, also used as the QR payload.
    pub code: Option<String>,
    pub photo: Option<String>,
}

impl PersonRecord {
    pub fn key(&self) -> PersonKey {
        PersonKey {
            kind: self.kind,
            id: self.id,
        }
    }
}

/// Card header data for an institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionProfile {
    pub name: String,
    pub logo: Option<String>,
    pub school_year: Option<String>,
}

impl InstitutionProfile {
    pub fn unnamed() -> Self {
        Self {
            name: "Institución Educativa".to_string(),
            logo: None,
            school_year: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum KindFilter {
    #[default]
    All,
    Student,
    Teacher,
}

impl KindFilter {
    pub fn includes(self, kind: PersonKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Student => kind == PersonKind::Student,
            KindFilter::Teacher => kind == PersonKind::Teacher,
        }
    }
}

/// Normalized filter set. `None` means "no constraint".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct PersonFilter {
    #[serde(rename = "type")]
    pub kind: KindFilter,
    pub level: Option<EducationLevel>,
    pub grade: Option<String>,
    pub section: Option<String>,
}

impl PersonFilter {
    pub fn matches(&self, person: &PersonRecord) -> bool {
        self.kind.includes(person.kind)
            && self.level.map_or(true, |level| person.level == Some(level))
            && self
                .grade
                .as_deref()
                .map_or(true, |grade| person.grade.as_deref() == Some(grade))
            && self
                .section
                .as_deref()
                .map_or(true, |section| person.section.as_deref() == Some(section))
    }
}
