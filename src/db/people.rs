//! Postgres-backed person directory over the `students`, `teachers` and
//! `institutions` tables.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::people::{
    DirectoryError, InstitutionProfile, KindFilter, PersonDirectory, PersonFilter, PersonKey,
    PersonKind, PersonRecord,
};
use crate::tenant::TenantId;

/// Levels compare the way `EducationLevel` parses stored values; grade and
/// section compare exactly.
const FILTERED_PEOPLE: &str = r#"
    FROM (
        SELECT 'student' AS kind, id, tenant_id, level, grade, section FROM students
        UNION ALL
        SELECT 'teacher' AS kind, id, tenant_id, level, grade, section FROM teachers
    ) people
    WHERE tenant_id = $1
      AND ($2::text IS NULL OR kind = $2)
      AND ($3::text IS NULL OR upper(trim(level)) = $3)
      AND ($4::text IS NULL OR grade = $4)
      AND ($5::text IS NULL OR section = $5)
"#;

#[derive(sqlx::FromRow)]
struct KeyRow {
    kind: String,
    id: i64,
}

#[derive(sqlx::FromRow)]
struct PersonRow {
    id: i64,
    tenant_id: i64,
    level: Option<String>,
    grade: Option<String>,
    section: Option<String>,
    full_name: Option<String>,
    document_number: Option<String>,
    code: Option<String>,
    photo: Option<String>,
}

impl PersonRow {
    fn into_record(self, kind: PersonKind) -> PersonRecord {
        let level = self.level.as_deref().and_then(|raw| match raw.parse() {
            Ok(level) => Some(level),
            Err(e) => {
                log::warn!("{}-{}: ignoring level: {}", kind.as_str(), self.id, e);
                None
            }
        });

        PersonRecord {
            id: self.id,
            kind,
            tenant_id: TenantId::new(self.tenant_id),
            level,
            grade: self.grade,
            section: self.section,
            full_name: self.full_name,
            document_number: self.document_number,
            code: self.code,
            photo: self.photo,
        }
    }
}

#[derive(sqlx::FromRow)]
struct InstitutionRow {
    name: String,
    logo: Option<String>,
    school_year: Option<String>,
}

pub struct PgPersonDirectory {
    pool: PgPool,
}

impl PgPersonDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_kind(
        &self,
        tenant: TenantId,
        kind: PersonKind,
        ids: &[i64],
    ) -> Result<Vec<PersonRecord>, DirectoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let table = match kind {
            PersonKind::Student => "students",
            PersonKind::Teacher => "teachers",
        };
        let sql = format!(
            "SELECT id, tenant_id, level, grade, section, full_name, document_number, code, photo \
             FROM {} WHERE tenant_id = $1 AND id = ANY($2)",
            table
        );

        let rows: Vec<PersonRow> = sqlx::query_as(&sql)
            .bind(tenant.get())
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.into_record(kind)).collect())
    }
}

fn kind_param(filter: &PersonFilter) -> Option<&'static str> {
    match filter.kind {
        KindFilter::All => None,
        KindFilter::Student => Some(PersonKind::Student.as_str()),
        KindFilter::Teacher => Some(PersonKind::Teacher.as_str()),
    }
}

#[async_trait]
impl PersonDirectory for PgPersonDirectory {
    async fn count(&self, tenant: TenantId, filter: &PersonFilter) -> Result<u64, DirectoryError> {
        let sql = format!("SELECT COUNT(*) {}", FILTERED_PEOPLE);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(tenant.get())
            .bind(kind_param(filter))
            .bind(filter.level.map(|level| level.as_str()))
            .bind(filter.grade.as_deref())
            .bind(filter.section.as_deref())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_keys(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
    ) -> Result<Vec<PersonKey>, DirectoryError> {
        let sql = format!(
            "SELECT kind, id {} ORDER BY CASE kind WHEN 'student' THEN 0 ELSE 1 END, id",
            FILTERED_PEOPLE
        );
        let rows: Vec<KeyRow> = sqlx::query_as(&sql)
            .bind(tenant.get())
            .bind(kind_param(filter))
            .bind(filter.level.map(|level| level.as_str()))
            .bind(filter.grade.as_deref())
            .bind(filter.section.as_deref())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| match row.kind.as_str() {
                "student" => Ok(PersonKey::student(row.id)),
                "teacher" => Ok(PersonKey::teacher(row.id)),
                other => Err(DirectoryError::CorruptRow {
                    key: format!("{}-{}", other, row.id),
                    reason: "unknown person kind".to_string(),
                }),
            })
            .collect()
    }

    async fn fetch_many(
        &self,
        tenant: TenantId,
        keys: &[PersonKey],
    ) -> Result<Vec<PersonRecord>, DirectoryError> {
        let ids_of = |kind: PersonKind| -> Vec<i64> {
            keys.iter()
                .filter(|key| key.kind == kind)
                .map(|key| key.id)
                .collect()
        };

        let mut found: HashMap<PersonKey, PersonRecord> = HashMap::with_capacity(keys.len());
        for kind in [PersonKind::Student, PersonKind::Teacher] {
            for record in self.fetch_kind(tenant, kind, &ids_of(kind)).await? {
                found.insert(record.key(), record);
            }
        }

        Ok(keys.iter().filter_map(|key| found.remove(key)).collect())
    }

    async fn institution(
        &self,
        tenant: TenantId,
    ) -> Result<Option<InstitutionProfile>, DirectoryError> {
        let row: Option<InstitutionRow> =
            sqlx::query_as("SELECT name, logo, school_year FROM institutions WHERE id = $1")
                .bind(tenant.get())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|row| InstitutionProfile {
            name: row.name,
            logo: row.logo,
            school_year: row.school_year,
        }))
    }
}
