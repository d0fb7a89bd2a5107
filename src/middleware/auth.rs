use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::AppState;

/// Identity issued by the external authentication service. Every count and
/// mapping operation is scoped to `tenant_id`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub exp: usize,
    pub iat: usize,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }

    /// Issues a token. Production tokens come from the identity service;
    /// this exists for local tooling and tests.
    pub fn generate_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        email: &str,
        ttl_seconds: usize,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as usize)
            .unwrap_or(0);

        let claims = Claims {
            sub: user_id.to_string(),
            user_id,
            tenant_id,
            email: email.to_string(),
            exp: now + ttl_seconds,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
    }

    pub fn extract_token_from_header(auth_header: &str) -> Option<&str> {
        auth_header.strip_prefix("Bearer ")
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let jwt_service = JwtService::new(&state.config.jwt_secret);

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(JwtService::extract_token_from_header);

    let Some(token) = token else {
        crate::middleware::metrics::record_auth_failure("missing_token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    match jwt_service.validate_token(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            crate::middleware::metrics::record_auth_failure("invalid_token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_keeps_tenant() {
        let service = JwtService::new("test-secret");
        let tenant_id = Uuid::new_v4();
        let token = service
            .generate_token(Uuid::new_v4(), tenant_id, "counter@example.com", 3600)
            .unwrap();

        let claims = service.validate_token(&token).unwrap();
        assert_eq!(claims.tenant_id, tenant_id);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtService::new("a")
            .generate_token(Uuid::new_v4(), Uuid::new_v4(), "x@example.com", 3600)
            .unwrap();
        assert!(JwtService::new("b").validate_token(&token).is_err());
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(JwtService::extract_token_from_header("Bearer abc"), Some("abc"));
        assert_eq!(JwtService::extract_token_from_header("Basic abc"), None);
    }
}
