//! Turns a filter set into the ordered list of people to print.

use std::sync::Arc;

use super::directory::PersonDirectory;
use super::model::{PersonFilter, PersonKey};
use crate::carnet::CarnetError;
use crate::tenant::TenantId;

/// Concrete target set for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Result of the count query.
    pub count: u64,
    /// Keys in card order. May differ from `count` if data changed between calls.
    pub keys: Vec<PersonKey>,
}

impl Resolution {
    pub fn total(&self) -> usize {
        self.keys.len()
    }
}

#[derive(Clone)]
pub struct FilterResolver {
    directory: Arc<dyn PersonDirectory>,
}

impl FilterResolver {
    pub fn new(directory: Arc<dyn PersonDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(
        &self,
        tenant: TenantId,
        filter: &PersonFilter,
    ) -> Result<Resolution, CarnetError> {
        let count = self
            .directory
            .count(tenant, filter)
            .await
            .map_err(|e| CarnetError::RenderFailure(format!("failed to count people: {}", e)))?;

        if count == 0 {
            log::info!("Tenant {}: no people match {:?}", tenant, filter);
            return Err(CarnetError::NoMatch);
        }

        let keys = self
            .directory
            .list_keys(tenant, filter)
            .await
            .map_err(|e| CarnetError::RenderFailure(format!("failed to list people: {}", e)))?;

        if keys.len() as u64 != count {
            log::warn!(
                "Tenant {}: people changed during resolution (count {}, listed {})",
                tenant,
                count,
                keys.len()
            );
        }

        if keys.is_empty() {
            return Err(CarnetError::NoMatch);
        }

        Ok(Resolution { count, keys })
    }
}
