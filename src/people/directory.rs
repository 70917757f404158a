//! Read access to a tenant's students and teachers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use super::model::{InstitutionProfile, PersonFilter, PersonKey, PersonRecord};
use crate::tenant::TenantId;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt person row {key}: {reason}")]
    CorruptRow { key: String, reason: String },
}

#[async_trait]
pub trait PersonDirectory: Send + Sync {
    async fn count(&self, tenant: TenantId, filter: &PersonFilter) -> Result<u64, DirectoryError>;

    /// Keys matching `filter`, in card order (students first, id ascending).
    async fn list_keys(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
    ) -> Result<Vec<PersonKey>, DirectoryError>;

    /// Records for `keys` that still exist, in the order of `keys`.
    async fn fetch_many(
        &self,
        tenant: TenantId,
        keys: &[PersonKey],
    ) -> Result<Vec<PersonRecord>, DirectoryError>;

    async fn institution(&self, tenant: TenantId)
        -> Result<Option<InstitutionProfile>, DirectoryError>;
}

/// In-process directory, used by tests and local demos.
#[derive(Default)]
pub struct InMemoryPersonDirectory {
    people: RwLock<BTreeMap<(TenantId, PersonKey), PersonRecord>>,
    institutions: RwLock<BTreeMap<TenantId, InstitutionProfile>>,
}

impl InMemoryPersonDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, person: PersonRecord) {
        self.people
            .write()
            .insert((person.tenant_id, person.key()), person);
    }

    pub fn remove(&self, tenant: TenantId, key: PersonKey) -> Option<PersonRecord> {
        self.people.write().remove(&(tenant, key))
    }

    pub fn set_institution(&self, tenant: TenantId, profile: InstitutionProfile) {
        self.institutions.write().insert(tenant, profile);
    }

    fn matching(&self, tenant: TenantId, filter: &PersonFilter) -> Vec<PersonKey> {
        self.people
            .read()
            .range((tenant, PersonKey::student(i64::MIN))..=(tenant, PersonKey::teacher(i64::MAX)))
            .filter(|(_, person)| filter.matches(person))
            .map(|((_, key), _)| *key)
            .collect()
    }
}

#[async_trait]
impl PersonDirectory for InMemoryPersonDirectory {
    async fn count(&self, tenant: TenantId, filter: &PersonFilter) -> Result<u64, DirectoryError> {
        Ok(self.matching(tenant, filter).len() as u64)
    }

    async fn list_keys(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
    ) -> Result<Vec<PersonKey>, DirectoryError> {
        Ok(self.matching(tenant, filter))
    }

    async fn fetch_many(
        &self,
        tenant: TenantId,
        keys: &[PersonKey],
    ) -> Result<Vec<PersonRecord>, DirectoryError> {
        let people = self.people.read();
        Ok(keys
            .iter()
            .filter_map(|key| people.get(&(tenant, *key)).cloned())
            .collect())
    }

    async fn institution(
        &self,
        tenant: TenantId,
    ) -> Result<Option<InstitutionProfile>, DirectoryError> {
        Ok(self.institutions.read().get(&tenant).cloned())
    }
}
