//! One generation from filters to a stored PDF.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use utoipa::ToSchema;

use super::exporter::{is_complete_pdf, ExportSlots, PdfExporter};
use super::paths;
use super::progress::{
    MonotonicSink, Phase, PipelineEvent, ProgressRange, ProgressSink, HTML_PROGRESS_END,
    PDF_HEARTBEAT_CEILING,
};
use super::renderer::{HtmlDocument, HtmlRenderer};
use super::CarnetError;
use crate::people::{FilterResolver, InstitutionProfile, PersonDirectory, PersonFilter};
use crate::storage::ObjectStorage;
use crate::tenant::TenantId;

const PDF_VALIDATED: u8 = 98;
const PDF_UPLOADING: u8 = 99;
const DONE: u8 = 100;
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub html_batch_size: usize,
    /// Interval of the synthetic progress ticks while the browser runs.
    pub pdf_heartbeat: Duration,
    /// Exports allowed to run at once across every caller of this pipeline.
    pub max_concurrent_exports: usize,
    /// How long an export may wait for a free slot.
    pub export_slot_wait: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            html_batch_size: 50,
            pdf_heartbeat: Duration::from_secs(2),
            max_concurrent_exports: 2,
            export_slot_wait: Duration::from_secs(300),
        }
    }
}

/// Deletes the HTML intermediate. If the generation unwinds or is dropped
/// before [`HtmlCleanup::finish`], the delete is spawned from `Drop`.
struct HtmlCleanup {
    storage: Arc<dyn ObjectStorage>,
    path: Option<String>,
}

impl HtmlCleanup {
    fn new(storage: Arc<dyn ObjectStorage>, path: String) -> Self {
        Self {
            storage,
            path: Some(path),
        }
    }

    async fn finish(mut self) {
        if let Some(path) = self.path.take() {
            remove_html(self.storage.as_ref(), &path).await;
        }
    }
}

impl Drop for HtmlCleanup {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let storage = Arc::clone(&self.storage);
                handle.spawn(async move { remove_html(storage.as_ref(), &path).await });
            }
            Err(_) => log::warn!("HTML intermediate {} left behind: no runtime", path),
        }
    }
}

async fn remove_html(storage: &dyn ObjectStorage, path: &str) {
    if let Err(e) = storage.delete(path).await {
        log::warn!("Failed to remove HTML intermediate {}: {}", path, e);
    }
}

/// A stored carnet PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct GeneratedCarnet {
    pub pdf_path: String,
    pub pdf_url: String,
    pub cards: usize,
    pub total_users: usize,
}

pub struct CarnetPipeline {
    resolver: FilterResolver,
    directory: Arc<dyn PersonDirectory>,
    renderer: HtmlRenderer,
    exporter: Arc<dyn PdfExporter>,
    slots: ExportSlots,
    storage: Arc<dyn ObjectStorage>,
    institutions: Cache<TenantId, InstitutionProfile>,
    settings: PipelineSettings,
}

impl CarnetPipeline {
    pub fn new(
        directory: Arc<dyn PersonDirectory>,
        storage: Arc<dyn ObjectStorage>,
        exporter: Arc<dyn PdfExporter>,
        settings: PipelineSettings,
    ) -> Self {
        let institutions = Cache::builder()
            .time_to_live(Duration::from_secs(10 * 60))
            .max_capacity(1_000)
            .build();

        Self {
            resolver: FilterResolver::new(Arc::clone(&directory)),
            renderer: HtmlRenderer::new(Arc::clone(&storage), settings.html_batch_size),
            directory,
            exporter,
            slots: ExportSlots::new(settings.max_concurrent_exports, settings.export_slot_wait),
            storage,
            institutions,
            settings,
        }
    }

    /// Run the whole generation, reporting progress to `sink`.
    ///
    /// Retryable export errors are retried until `export_attempts` runs out.
    /// The HTML intermediate is removed whether or not the export succeeds,
    /// including when the export panics.
    pub async fn run(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
        sink: &dyn ProgressSink,
        export_attempts: u32,
    ) -> Result<GeneratedCarnet, CarnetError> {
        let sink = MonotonicSink::new(sink);

        let resolution = self.resolver.resolve(tenant, filter).await?;
        let total_users = resolution.total();
        sink.emit(PipelineEvent::Started { total_users }).await;

        let institution = self.institution(tenant).await;
        let document = self
            .renderer
            .render(
                tenant,
                &institution,
                &resolution.keys,
                self.directory.as_ref(),
                &sink,
                ProgressRange::new(0, HTML_PROGRESS_END),
            )
            .await?;

        let cleanup = HtmlCleanup::new(Arc::clone(&self.storage), document.path.clone());
        let exported = self.export(&document, &sink, export_attempts).await;
        cleanup.finish().await;

        let pdf = exported?;
        if !is_complete_pdf(&pdf) {
            return Err(CarnetError::ExportFailure(
                "exporter returned an incomplete PDF".to_string(),
            ));
        }
        emit_pdf(&sink, PDF_VALIDATED).await;

        let pdf_path = paths::pdf_path(tenant, document.generated_at, document.nonce);
        emit_pdf(&sink, PDF_UPLOADING).await;
        self.storage
            .put(&pdf_path, &pdf, "application/pdf")
            .await
            .map_err(|e| CarnetError::ExportFailure(format!("failed to store PDF: {}", e)))?;
        emit_pdf(&sink, DONE).await;

        log::info!(
            "Tenant {}: generated {} carnets ({} bytes) at {}",
            tenant,
            document.cards,
            pdf.len(),
            pdf_path
        );

        Ok(GeneratedCarnet {
            pdf_url: self.storage.public_url(&pdf_path),
            pdf_path,
            cards: document.cards,
            total_users,
        })
    }

    async fn institution(&self, tenant: TenantId) -> InstitutionProfile {
        if let Some(profile) = self.institutions.get(&tenant).await {
            return profile;
        }

        match self.directory.institution(tenant).await {
            Ok(profile) => {
                let profile = profile.unwrap_or_else(InstitutionProfile::unnamed);
                self.institutions.insert(tenant, profile.clone()).await;
                profile
            }
            Err(e) => {
                log::warn!("Tenant {}: institution lookup failed: {}", tenant, e);
                InstitutionProfile::unnamed()
            }
        }
    }

    async fn export(
        &self,
        document: &HtmlDocument,
        sink: &MonotonicSink<'_>,
        attempts: u32,
    ) -> Result<Vec<u8>, CarnetError> {
        let attempts = attempts.max(1);
        emit_pdf(sink, HTML_PROGRESS_END).await;

        let mut attempt = 1;
        loop {
            match self.export_with_heartbeat(document, sink).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    log::warn!(
                        "Tenant {}: export attempt {}/{} failed, retrying: {}",
                        document.tenant,
                        attempt,
                        attempts,
                        e
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn export_with_heartbeat(
        &self,
        document: &HtmlDocument,
        sink: &MonotonicSink<'_>,
    ) -> Result<Vec<u8>, CarnetError> {
        // Progress stays at 85 until a slot is held.
        let _slot = self.slots.acquire().await?;
        let export = self.exporter.export(document);
        tokio::pin!(export);

        let mut heartbeat =
            tokio::time::interval(self.settings.pdf_heartbeat.max(MIN_HEARTBEAT));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;
                result = &mut export => return result,
                _ = heartbeat.tick() => {
                    let next = sink.last().unwrap_or(HTML_PROGRESS_END).saturating_add(1);
                    if next <= PDF_HEARTBEAT_CEILING {
                        emit_pdf(sink, next).await;
                    }
                }
            }
        }
    }
}

async fn emit_pdf(sink: &dyn ProgressSink, progress: u8) {
    sink.emit(PipelineEvent::Progress {
        progress,
        phase: Phase::Pdf,
    })
    .await;
}
