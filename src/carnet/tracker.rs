//! Persisted state of queued generation requests.
//!
//! `PENDING → PROCESSING → {COMPLETED, FAILED}`. Terminal records never
//! change again; progress never goes backwards.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::people::PersonFilter;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Pending => "PENDING",
            GenerationStatus::Processing => "PROCESSING",
            GenerationStatus::Completed => "COMPLETED",
            GenerationStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(GenerationStatus::Pending),
            "PROCESSING" => Ok(GenerationStatus::Processing),
            "COMPLETED" => Ok(GenerationStatus::Completed),
            "FAILED" => Ok(GenerationStatus::Failed),
            other => Err(format!("unknown generation status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    Progress(u8),
    Complete { result_path: String },
    Fail { message: String },
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Progress(_) => "progress",
            Transition::Complete { .. } => "complete",
            Transition::Fail { .. } => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Valid but a no-op (repeated start, non-increasing progress).
    Ignored,
    /// Not allowed from the current state; the record is unchanged.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerationRequest {
    pub id: Uuid,
    #[schema(value_type = i64)]
    pub tenant_id: TenantId,
    pub filters: PersonFilter,
    pub status: GenerationStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationRequest {
    pub fn new(tenant_id: TenantId, filters: PersonFilter) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            filters,
            status: GenerationStatus::Pending,
            progress: 0,
            result_path: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a transition in place. Never panics; disallowed transitions leave
    /// the record untouched and report `Rejected`.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) -> TransitionOutcome {
        use GenerationStatus::*;

        if self.status.is_terminal() {
            return TransitionOutcome::Rejected(format!(
                "{} on terminal request {} ({})",
                transition.name(),
                self.id,
                self.status
            ));
        }

        match (self.status, transition) {
            (Pending, Transition::Start) => {
                self.status = Processing;
                self.started_at = Some(now);
                TransitionOutcome::Applied
            }
            (Processing, Transition::Start) => TransitionOutcome::Ignored,
            (Processing, Transition::Progress(value)) => {
                let value = (*value).min(100);
                if value <= self.progress {
                    TransitionOutcome::Ignored
                } else {
                    self.progress = value;
                    TransitionOutcome::Applied
                }
            }
            (Processing, Transition::Complete { result_path }) => {
                self.status = Completed;
                self.progress = 100;
                self.result_path = Some(result_path.clone());
                self.completed_at = Some(now);
                TransitionOutcome::Applied
            }
            (Pending | Processing, Transition::Fail { message }) => {
                self.status = Failed;
                self.error_message = Some(message.clone());
                self.completed_at = Some(now);
                TransitionOutcome::Applied
            }
            (status, transition) => TransitionOutcome::Rejected(format!(
                "{} not allowed while {} for request {}",
                transition.name(),
                status,
                self.id
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("generation request {0} not found")]
    NotFound(Uuid),
    #[error("corrupt generation request {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn insert(&self, request: &GenerationRequest) -> Result<(), StoreError>;

    /// Only returns the request if it belongs to `tenant`.
    async fn find(
        &self,
        tenant: TenantId,
        id: Uuid,
    ) -> Result<Option<GenerationRequest>, StoreError>;

    /// Most recent first.
    async fn list(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<GenerationRequest>, StoreError>;

    /// Atomically apply `transition` to the stored request.
    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> Result<TransitionOutcome, StoreError>;
}

#[derive(Default)]
pub struct InMemoryGenerationStore {
    requests: RwLock<HashMap<Uuid, GenerationRequest>>,
}

impl InMemoryGenerationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GenerationStore for InMemoryGenerationStore {
    async fn insert(&self, request: &GenerationRequest) -> Result<(), StoreError> {
        self.requests.write().insert(request.id, request.clone());
        Ok(())
    }

    async fn find(
        &self,
        tenant: TenantId,
        id: Uuid,
    ) -> Result<Option<GenerationRequest>, StoreError> {
        Ok(self
            .requests
            .read()
            .get(&id)
            .filter(|request| request.tenant_id == tenant)
            .cloned())
    }

    async fn list(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        let mut requests: Vec<_> = self
            .requests
            .read()
            .values()
            .filter(|request| request.tenant_id == tenant)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests.truncate(limit);
        Ok(requests)
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut requests = self.requests.write();
        let request = requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        Ok(request.apply(transition, Utc::now()))
    }
}

/// Pipeline-facing wrapper around a [`GenerationStore`].
///
/// Mutators never return errors: store failures and disallowed transitions
/// are logged so a worker is never brought down by bookkeeping.
#[derive(Clone)]
pub struct Tracker {
    store: Arc<dyn GenerationStore>,
}

impl Tracker {
    pub fn new(store: Arc<dyn GenerationStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        tenant: TenantId,
        filters: PersonFilter,
    ) -> Result<GenerationRequest, StoreError> {
        let request = GenerationRequest::new(tenant, filters);
        self.store.insert(&request).await?;
        log::info!("Created generation request {} for tenant {}", request.id, tenant);
        Ok(request)
    }

    pub async fn get(
        &self,
        tenant: TenantId,
        id: Uuid,
    ) -> Result<Option<GenerationRequest>, StoreError> {
        self.store.find(tenant, id).await
    }

    pub async fn list(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        self.store.list(tenant, limit).await
    }

    pub async fn start(&self, id: Uuid) {
        self.apply(id, Transition::Start).await;
    }

    pub async fn progress(&self, id: Uuid, progress: u8) {
        self.apply(id, Transition::Progress(progress)).await;
    }

    pub async fn complete(&self, id: Uuid, result_path: String) {
        self.apply(id, Transition::Complete { result_path }).await;
    }

    pub async fn fail(&self, id: Uuid, message: String) {
        self.apply(id, Transition::Fail { message }).await;
    }

    async fn apply(&self, id: Uuid, transition: Transition) -> TransitionOutcome {
        match self.store.transition(id, &transition).await {
            Ok(TransitionOutcome::Rejected(reason)) => {
                log::warn!("Ignoring tracker anomaly: {}", reason);
                TransitionOutcome::Rejected(reason)
            }
            Ok(outcome) => {
                if !matches!(transition, Transition::Progress(_)) {
                    log::debug!("Request {}: {} -> {:?}", id, transition.name(), outcome);
                }
                outcome
            }
            Err(e) => {
                log::error!("Failed to record {} for request {}: {}", transition.name(), id, e);
                TransitionOutcome::Rejected(e.to_string())
            }
        }
    }
}
