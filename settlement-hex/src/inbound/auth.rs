//! Authentication middleware for bearer JWT validation.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::caller::Caller;

/// Token claims accepted by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies HS256 bearer tokens.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Caller, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(Caller::new(data.claims.sub, data.claims.roles))
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
fn extract_bearer(auth_header: Option<&str>) -> Option<&str> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication middleware that validates bearer tokens.
///
/// On success the verified [`Caller`] is stored as a request extension.
/// `/health` bypasses authentication.
pub async fn auth_middleware(
    State(verifier): State<Arc<JwtVerifier>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match extract_bearer(auth_header) {
        Some(token) => token,
        None => return unauthorized_response("Missing or invalid Authorization header"),
    };

    match verifier.verify(token) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!("Token rejected: {}", e);
            unauthorized_response("Invalid or expired token")
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": message,
            "kind": "Unauthorized",
            "code": 401
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp_offset: i64) -> Claims {
        Claims {
            sub: "user-1".into(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as u64,
            roles: vec!["operator".into()],
            iss: None,
        }
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer(Some("abc.def")), None);
        assert_eq!(extract_bearer(Some("Bearer ")), None);
        assert_eq!(extract_bearer(None), None);
    }

    #[test]
    fn test_verify_valid_token() {
        let verifier = JwtVerifier::new("secret", None);

        let caller = verifier.verify(&token("secret", &claims(3600))).unwrap();

        assert_eq!(caller.subject, "user-1");
        assert!(caller.is_operator());
    }

    #[test]
    fn test_verify_rejects_wrong_secret_and_expired() {
        let verifier = JwtVerifier::new("secret", None);

        assert!(verifier.verify(&token("other", &claims(3600))).is_err());
        assert!(verifier.verify(&token("secret", &claims(-3600))).is_err());
    }

    #[test]
    fn test_verify_checks_issuer() {
        let verifier = JwtVerifier::new("secret", Some("auth-service"));
        let mut with_issuer = claims(3600);
        with_issuer.iss = Some("auth-service".into());

        assert!(verifier.verify(&token("secret", &with_issuer)).is_ok());
        assert!(verifier.verify(&token("secret", &claims(3600))).is_err());
    }
}
