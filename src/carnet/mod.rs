//! Carnet (ID card) generation.
//!
//! A generation resolves a filter set into people, renders one HTML card per
//! person, exports the document to PDF through a headless browser, and stores
//! the result under the tenant's namespace. The same [`pipeline::CarnetPipeline`]
//! backs both the SSE stream and the queued worker.

pub mod exporter;
pub mod filters;
pub mod handlers;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod renderer;
pub mod sse;
pub mod template;
pub mod tracker;
pub mod validation;

pub use exporter::{
    ChromiumExporter, ExportSlot, ExportSlots, PageFormat, PdfExportOptions, PdfExporter,
};
pub use filters::CarnetFilters;
pub use pipeline::{CarnetPipeline, GeneratedCarnet, PipelineSettings};
pub use progress::{Phase, PipelineEvent, ProgressSink};
pub use queue::{CarnetQueue, QueueError};
pub use renderer::{HtmlDocument, HtmlRenderer};
pub use tracker::{
    GenerationRequest, GenerationStatus, GenerationStore, InMemoryGenerationStore, StoreError,
    Tracker, Transition, TransitionOutcome,
};

use std::time::Duration;

use thiserror::Error;

/// Message shown when the filters select nobody.
pub const NO_MATCH_MESSAGE: &str = "no users found for filters";

/// Whole-request failures of a generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CarnetError {
    #[error("no users found for filters")]
    NoMatch,
    #[error("failed to render carnet HTML: {0}")]
    RenderFailure(String),
    #[error("PDF export timed out after {}s", .0.as_secs())]
    RenderTimeout(Duration),
    #[error("PDF export failed: {0}")]
    ExportFailure(String),
    #[error("artifact is outside the caller's tenant")]
    Unauthorized,
}

impl CarnetError {
    /// Whether running the export again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CarnetError::RenderTimeout(_) | CarnetError::ExportFailure(_))
    }

    /// Stable identifier used in API error bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            CarnetError::NoMatch => "NoMatch",
            CarnetError::RenderFailure(_) => "RenderFailure",
            CarnetError::RenderTimeout(_) => "RenderTimeout",
            CarnetError::ExportFailure(_) => "ExportFailure",
            CarnetError::Unauthorized => "Unauthorized",
        }
    }
}

/// User-facing hint for an error. Kept apart from the error type so the
/// wording can change (or be translated) without touching the pipeline.
pub fn suggestion_for(error: &CarnetError) -> Option<&'static str> {
    match error {
        CarnetError::NoMatch => Some("Revise los filtros de nivel, grado y sección e intente nuevamente."),
        CarnetError::RenderTimeout(_) => {
            Some("Intente generar un grupo más pequeño o vuelva a intentarlo en unos minutos.")
        }
        CarnetError::ExportFailure(_) => Some("Vuelva a intentarlo; si el problema persiste contacte al administrador."),
        CarnetError::RenderFailure(_) => None,
        CarnetError::Unauthorized => None,
    }
}
