//! Tenant-namespaced artifact paths.
//!
//! Layout: `tenants/{tenant}/carnets/{html|pdf}/carnets_{YYYYmmdd_HHMMSS}_{nonce}.{ext}`.
//! Only characters `[a-z0-9_/.]` ever appear in generated paths.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::CarnetError;
use crate::tenant::TenantId;

pub fn tenant_prefix(tenant: TenantId) -> String {
    format!("tenants/{}/", tenant)
}

fn artifact_name(generated_at: DateTime<Utc>, nonce: Uuid) -> String {
    let simple = nonce.simple().to_string();
    format!("carnets_{}_{}", generated_at.format("%Y%m%d_%H%M%S"), &simple[..8])
}

pub fn html_path(tenant: TenantId, generated_at: DateTime<Utc>, nonce: Uuid) -> String {
    format!(
        "{}carnets/html/{}.html",
        tenant_prefix(tenant),
        artifact_name(generated_at, nonce)
    )
}

pub fn pdf_path(tenant: TenantId, generated_at: DateTime<Utc>, nonce: Uuid) -> String {
    format!(
        "{}carnets/pdf/{}.pdf",
        tenant_prefix(tenant),
        artifact_name(generated_at, nonce)
    )
}

/// Check that `path` lives inside the tenant's namespace.
///
/// Purely lexical: never touches storage, so the answer does not depend on
/// whether the object exists.
pub fn authorize_download(tenant: TenantId, path: &str) -> Result<(), CarnetError> {
    let prefix = tenant_prefix(tenant);
    let Some(rest) = path.strip_prefix(&prefix) else {
        return Err(CarnetError::Unauthorized);
    };

    let traverses = rest.is_empty()
        || path.contains('\\')
        || rest
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if traverses {
        return Err(CarnetError::Unauthorized);
    }

    Ok(())
}

/// Last path segment, used as the download filename.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
