//! Application state and the Postgres-backed stores.
//!
//! - `people` - read access to students, teachers and institutions
//! - `generation` - queued generation request records

mod generation;
mod people;

pub use generation::PgGenerationStore;
pub use people::PgPersonDirectory;

use std::sync::Arc;
use std::time::Duration;

use crate::carnet::{
    CarnetPipeline, CarnetQueue, ChromiumExporter, GenerationStore,
    InMemoryGenerationStore, PdfExportOptions, PdfExporter, PipelineSettings, Tracker,
};
use crate::config::{AppConfig, StorageBackend};
use crate::people::{InMemoryPersonDirectory, PersonDirectory};
use crate::storage::{LocalStorage, ObjectStorage, SupabaseStorage};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub pipeline: Arc<CarnetPipeline>,
    pub queue: Arc<CarnetQueue>,
    pub tracker: Tracker,
}

impl AppState {
    /// Connect to Postgres (when configured), run migrations, and start the
    /// queue workers.
    pub async fn new_with_config(config: AppConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(900))
            .user_agent("carnet-server/1.0")
            .build()?;

        let storage: Arc<dyn ObjectStorage> = match &config.storage {
            StorageBackend::Local { root } => {
                log::info!("Using local storage at {}", root.display());
                Arc::new(LocalStorage::new(root.clone(), config.public_base_url.clone()))
            }
            StorageBackend::Supabase(supabase) => {
                log::info!("Using Supabase storage bucket {}", supabase.bucket_name);
                Arc::new(SupabaseStorage::new(supabase.clone(), http_client))
            }
        };

        let (directory, store): (Arc<dyn PersonDirectory>, Arc<dyn GenerationStore>) =
            match &config.database_url {
                Some(database_url) => {
                    let pool = sqlx::postgres::PgPoolOptions::new()
                        .max_connections(20)
                        .min_connections(2)
                        .acquire_timeout(Duration::from_secs(30))
                        .idle_timeout(Duration::from_secs(900))
                        .max_lifetime(Duration::from_secs(1800))
                        .connect(database_url)
                        .await?;
                    sqlx::migrate!("./migrations").run(&pool).await?;
                    (
                        Arc::new(PgPersonDirectory::new(pool.clone())),
                        Arc::new(PgGenerationStore::new(pool)),
                    )
                }
                None => {
                    log::warn!("DATABASE_URL not set; using empty in-memory stores");
                    (
                        Arc::new(InMemoryPersonDirectory::new()),
                        Arc::new(InMemoryGenerationStore::new()),
                    )
                }
            };

        let exporter = Arc::new(ChromiumExporter::new(
            config.chromium_path.clone(),
            PdfExportOptions::default().with_timeout(config.export_timeout),
        ));

        Ok(Self::from_parts(config, directory, store, storage, exporter))
    }

    /// Wire the pipeline and queue from already-built parts. Must be called
    /// inside a Tokio runtime because it spawns the queue workers.
    pub fn from_parts(
        config: AppConfig,
        directory: Arc<dyn PersonDirectory>,
        store: Arc<dyn GenerationStore>,
        storage: Arc<dyn ObjectStorage>,
        exporter: Arc<dyn PdfExporter>,
    ) -> Self {
        let pipeline = Arc::new(CarnetPipeline::new(
            directory,
            Arc::clone(&storage),
            exporter,
            PipelineSettings {
                html_batch_size: config.html_batch_size,
                pdf_heartbeat: config.pdf_heartbeat,
                max_concurrent_exports: config.max_concurrent_exports,
                export_slot_wait: config.export_timeout,
            },
        ));

        let tracker = Tracker::new(store);
        let queue = Arc::new(CarnetQueue::start(
            Arc::clone(&pipeline),
            tracker.clone(),
            config.queue_workers,
            config.queue_capacity,
            config.max_attempts,
        ));

        AppState {
            config: Arc::new(config),
            storage,
            pipeline,
            queue,
            tracker,
        }
    }
}
