//! Generation request persistence in `carnet_generations`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::carnet::tracker::{
    GenerationRequest, GenerationStore, StoreError, Transition, TransitionOutcome,
};
use crate::people::PersonFilter;
use crate::tenant::TenantId;

const COLUMNS: &str = "id, tenant_id, filters, status, progress, result_path, error_message, \
                       created_at, started_at, completed_at";

#[derive(sqlx::FromRow)]
struct GenerationRow {
    id: Uuid,
    tenant_id: i64,
    filters: Json<PersonFilter>,
    status: String,
    progress: i16,
    result_path: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<GenerationRow> for GenerationRequest {
    type Error = StoreError;

    fn try_from(row: GenerationRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|reason| StoreError::Corrupt {
            id: row.id,
            reason,
        })?;
        let progress = u8::try_from(row.progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| StoreError::Corrupt {
                id: row.id,
                reason: format!("progress {} out of range", row.progress),
            })?;

        Ok(GenerationRequest {
            id: row.id,
            tenant_id: TenantId::new(row.tenant_id),
            filters: row.filters.0,
            status,
            progress,
            result_path: row.result_path,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

pub struct PgGenerationStore {
    pool: PgPool,
}

impl PgGenerationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GenerationStore for PgGenerationStore {
    async fn insert(&self, request: &GenerationRequest) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO carnet_generations
                (id, tenant_id, filters, status, progress, result_path, error_message,
                 created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id)
        .bind(request.tenant_id.get())
        .bind(Json(&request.filters))
        .bind(request.status.as_str())
        .bind(i16::from(request.progress))
        .bind(request.result_path.as_deref())
        .bind(request.error_message.as_deref())
        .bind(request.created_at)
        .bind(request.started_at)
        .bind(request.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        tenant: TenantId,
        id: Uuid,
    ) -> Result<Option<GenerationRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM carnet_generations WHERE id = $1 AND tenant_id = $2",
            COLUMNS
        );
        let row: Option<GenerationRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(tenant.get())
            .fetch_optional(&self.pool)
            .await?;
        row.map(GenerationRequest::try_from).transpose()
    }

    async fn list(
        &self,
        tenant: TenantId,
        limit: usize,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM carnet_generations WHERE tenant_id = $1 ORDER BY created_at DESC LIMIT $2",
            COLUMNS
        );
        let rows: Vec<GenerationRow> = sqlx::query_as(&sql)
            .bind(tenant.get())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(GenerationRequest::try_from).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: &Transition,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM carnet_generations WHERE id = $1 FOR UPDATE",
            COLUMNS
        );
        let row: Option<GenerationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut request = GenerationRequest::try_from(row.ok_or(StoreError::NotFound(id))?)?;

        let outcome = request.apply(transition, Utc::now());
        if outcome == TransitionOutcome::Applied {
            sqlx::query(
                r#"
                UPDATE carnet_generations
                SET status = $2, progress = $3, result_path = $4, error_message = $5,
                    started_at = $6, completed_at = $7
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(request.status.as_str())
            .bind(i16::from(request.progress))
            .bind(request.result_path.as_deref())
            .bind(request.error_message.as_deref())
            .bind(request.started_at)
            .bind(request.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }
}
