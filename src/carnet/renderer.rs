//! HTML stage of the pipeline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::paths;
use super::progress::{Phase, PipelineEvent, ProgressRange, ProgressSink};
use super::template::CardTemplate;
use super::CarnetError;
use crate::people::{InstitutionProfile, PersonDirectory, PersonKey};
use crate::storage::ObjectStorage;
use crate::tenant::TenantId;

/// Assembled card document, already persisted to shared storage.
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    pub tenant: TenantId,
    /// Storage path of the persisted HTML.
    pub path: String,
    pub html: String,
    pub cards: usize,
    /// Keys that were listed but no longer existed when fetched.
    pub skipped: usize,
    pub generated_at: DateTime<Utc>,
    pub nonce: Uuid,
}

pub struct HtmlRenderer {
    storage: Arc<dyn ObjectStorage>,
    batch_size: usize,
}

impl HtmlRenderer {
    pub fn new(storage: Arc<dyn ObjectStorage>, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
        }
    }

    /// Render one card per key and persist the document.
    ///
    /// Progress is reported per record inside `range` and reaches `range.end`
    /// only after the last record. Keys whose record vanished are skipped.
    pub async fn render(
        &self,
        tenant: TenantId,
        institution: &InstitutionProfile,
        keys: &[PersonKey],
        directory: &dyn PersonDirectory,
        sink: &dyn ProgressSink,
        range: ProgressRange,
    ) -> Result<HtmlDocument, CarnetError> {
        let generated_at = Utc::now();
        let nonce = Uuid::new_v4();
        let storage = Arc::clone(&self.storage);
        let resolve_asset = move |path: &str| storage.public_url(path);
        let template = CardTemplate::new(institution, &resolve_asset);

        let total = keys.len();
        let mut html = template.document_start(generated_at);
        let mut cards = 0usize;
        let mut done = 0usize;

        sink.emit(PipelineEvent::Progress {
            progress: range.scale(0, total),
            phase: Phase::Html,
        })
        .await;

        for batch in keys.chunks(self.batch_size) {
            let people = directory.fetch_many(tenant, batch).await.map_err(|e| {
                CarnetError::RenderFailure(format!("failed to load people: {}", e))
            })?;

            let mut people = people.into_iter().peekable();
            for key in batch {
                done += 1;
                match people.next_if(|person| person.key() == *key) {
                    Some(person) if person.tenant_id == tenant => {
                        html.push_str(&template.card(&person));
                        cards += 1;
                    }
                    Some(person) => {
                        log::error!(
                            "Directory returned {} for tenant {} while rendering tenant {}",
                            key,
                            person.tenant_id,
                            tenant
                        );
                    }
                    None => log::warn!("Skipping {}: record no longer exists", key),
                }

                sink.emit(PipelineEvent::Progress {
                    progress: range.scale(done, total),
                    phase: Phase::Html,
                })
                .await;
            }
        }

        html.push_str(template.document_end());

        let skipped = total - cards;
        if cards == 0 {
            return Err(CarnetError::RenderFailure(
                "every listed person disappeared before rendering".to_string(),
            ));
        }

        let path = paths::html_path(tenant, generated_at, nonce);
        self.storage
            .put(&path, html.as_bytes(), "text/html; charset=utf-8")
            .await
            .map_err(|e| CarnetError::RenderFailure(format!("failed to store HTML: {}", e)))?;

        log::info!(
            "Rendered {} carnets for tenant {} ({} skipped) at {}",
            cards,
            tenant,
            skipped,
            path
        );

        Ok(HtmlDocument {
            tenant,
            path,
            html,
            cards,
            skipped,
            generated_at,
            nonce,
        })
    }
}
