//! People directory and filter resolution.

pub mod directory;
pub mod model;
pub mod resolver;

pub use directory::{DirectoryError, InMemoryPersonDirectory, PersonDirectory};
pub use model::{
    EducationLevel, InstitutionProfile, KindFilter, PersonFilter, PersonKey, PersonKind,
    PersonRecord,
};
pub use resolver::{FilterResolver, Resolution};
