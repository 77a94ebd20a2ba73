//! JWT verification and request authentication.
//!
//! Tokens are HS256-signed by the identity service that fronts this API.
//! Websocket handshakes additionally carry an anti-forgery token bound to
//! the JWT's session id via HMAC, so a stolen token pasted into another
//! browser session fails the binding check.

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use genflow_models::{OwnerScope, Role};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{error::ApiError, state::AppState};

type HmacSha256 = Hmac<Sha256>;

/// JWT claims issued by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Tenant (client application) id
    #[serde(rename = "clientId")]
    pub client_id: String,
    /// Role name, absent means regular user
    #[serde(default)]
    pub role: Option<String>,
    /// Session id, the anti-forgery binding target
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verifies bearer tokens and session bindings.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    secret: String,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            secret: secret.to_string(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let secret = std::env::var("AUTH_TOKEN_SECRET")
            .map_err(|_| anyhow::anyhow!("AUTH_TOKEN_SECRET must be set"))?;
        Ok(Self::new(&secret))
    }

    /// Decode and validate a bearer token.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "token verification failed");
                ApiError::unauthorized("Invalid or expired token")
            })
    }

    /// HMAC binding for a session id, base64url without padding.
    pub fn session_binding(&self, session_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(session_id.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of an anti-forgery token against a session id.
    pub fn verify_session_binding(&self, session_id: &str, binding: &str) -> bool {
        let sig = match URL_SAFE_NO_PAD.decode(binding) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(session_id.as_bytes());
        mac.verify_slice(&sig).is_ok()
    }
}

/// Authenticated caller extracted from the Authorization header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub client_id: String,
    pub role: Role,
    pub session_id: String,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            role: Role::parse(claims.role.as_deref().unwrap_or("user")),
            user_id: claims.sub,
            client_id: claims.client_id,
            session_id: claims.sid,
        }
    }

    /// Ownership scope for jobs this caller submits or reads.
    pub fn owner(&self) -> OwnerScope {
        OwnerScope::new(&self.client_id, &self.user_id)
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

        let claims = state.tokens.verify(bearer.token())?;
        Ok(Self::from_claims(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn mint(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(role: Option<&str>) -> Claims {
        let now = chrono::Utc::now().timestamp();
        Claims {
            sub: "user-1".to_string(),
            client_id: "acme".to_string(),
            role: role.map(String::from),
            sid: "sess-abc".to_string(),
            iat: now,
            exp: now + 3600,
        }
    }

    #[test]
    fn verifies_valid_token() {
        let verifier = TokenVerifier::new("test-secret");
        let token = mint("test-secret", &claims(Some("admin")));

        let decoded = verifier.verify(&token).unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.client_id, "acme");

        let user = AuthUser::from_claims(decoded);
        assert!(user.is_admin());
        assert_eq!(user.owner(), OwnerScope::new("acme", "user-1"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = TokenVerifier::new("test-secret");
        let token = mint("other-secret", &claims(None));
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = TokenVerifier::new("test-secret");
        let mut c = claims(None);
        c.iat -= 7200;
        c.exp = c.iat + 60;
        let token = mint("test-secret", &c);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn missing_role_defaults_to_user() {
        let user = AuthUser::from_claims(claims(None));
        assert!(!user.is_admin());
    }

    #[test]
    fn session_binding_roundtrip() {
        let verifier = TokenVerifier::new("test-secret");
        let binding = verifier.session_binding("sess-abc");
        assert!(verifier.verify_session_binding("sess-abc", &binding));
        assert!(!verifier.verify_session_binding("sess-other", &binding));
        assert!(!verifier.verify_session_binding("sess-abc", "not-base64!!"));
    }
}
