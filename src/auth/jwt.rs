use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

use super::model::Claims;
use crate::tenant::TenantId;

const ACCESS_TOKEN_EXPIRY_SECONDS: i64 = 15 * 60; // 15 minutes

/// Generate an access token bound to a tenant.
///
/// Tokens are normally issued by the identity service; this exists for
/// tooling and tests that need to call the API directly.
pub fn generate_access_token(
    user_id: &str,
    username: &str,
    tenant: TenantId,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        tenant_id: tenant.get(),
        exp: now + ACCESS_TOKEN_EXPIRY_SECONDS as usize,
        iat: now,
        token_type: "access".to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate and decode a token
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn test_token_round_trip_keeps_tenant() {
        let token = generate_access_token("7", "secretaria", TenantId::new(42), SECRET).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.tenant_id, 42);
        assert_eq!(claims.token_type, "access");
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let token = generate_access_token("7", "secretaria", TenantId::new(42), SECRET).unwrap();
        let tampered = format!("{}x", token);
        assert!(validate_token(&tampered, SECRET).is_err());
    }

    #[test]
    fn test_token_signed_with_another_secret_is_rejected() {
        let token =
            generate_access_token("7", "secretaria", TenantId::new(42), "someone-else").unwrap();
        assert!(validate_token(&token, SECRET).is_err());
    }
}
