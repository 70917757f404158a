use std::future::{ready, Ready};

use actix_web::error::InternalError;
use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest, HttpResponse};

use super::jwt::validate_token;
use super::model::Claims;
use crate::db::AppState;
use crate::tenant::TenantId;
use crate::ErrorResponse;

fn unauthorized(message: &'static str) -> Error {
    InternalError::from_response(
        message,
        HttpResponse::Unauthorized().json(ErrorResponse::new("Unauthenticated", message)),
    )
    .into()
}

/// Extract token from Authorization header
fn extract_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(|token| token.trim().to_string()))
}

/// Validate token from HttpRequest against `secret` and return claims
pub fn validate_request_token(req: &HttpRequest, secret: &str) -> Result<Claims, Error> {
    if secret.is_empty() {
        log::error!("Rejecting request: no JWT secret is configured");
        return Err(unauthorized("Authentication is not configured"));
    }

    let token =
        extract_token(req).ok_or_else(|| unauthorized("Missing authorization token"))?;

    let claims = validate_token(&token, secret).map_err(|e| {
        log::warn!("Token validation failed: {:?}", e);
        unauthorized("Invalid or expired token")
    })?;

    if claims.token_type != "access" {
        return Err(unauthorized("Invalid token type"));
    }

    Ok(claims)
}

/// The caller's tenant, taken from a validated bearer token.
impl FromRequest for TenantId {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            log::error!("TenantId extractor used without application state");
            return ready(Err(actix_web::error::ErrorInternalServerError(
                "application state is not configured",
            )));
        };

        ready(
            validate_request_token(req, &state.config.jwt_secret)
                .map(|claims| TenantId::new(claims.tenant_id)),
        )
    }
}
