// src/security.rs
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by the auth token. `jti` names the server-side session
/// record; a token without a live session record is worthless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub uid: i64,
    pub jti: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    pub expiration_seconds: i64,
    pub cookie_name: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: String, expiration_seconds: i64, cookie_name: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            expiration_seconds,
            cookie_name,
        }
    }

    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").unwrap_or_else(|_| "change-me-in-prod".to_string());
        let issuer =
            std::env::var("JWT_ISSUER").unwrap_or_else(|_| "travel-planner".to_string());
        let expiration_seconds = std::env::var("JWT_EXPIRATION_SECONDS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(2_592_000); // 30 days
        let cookie_name =
            std::env::var("AUTH_COOKIE_NAME").unwrap_or_else(|_| "AUTH_TOKEN".to_string());
        Self::new(&secret, issuer, expiration_seconds, cookie_name)
    }

    pub fn generate_token(
        &self,
        user_id: i64,
        session_id: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            uid: user_id,
            jti: session_id.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.expiration_seconds,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Signature, issuer and expiry checks; anything invalid is simply `None`
    /// so callers treat the request as anonymous.
    pub fn validate(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[self.issuer.as_str()]);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .ok()
    }

    /// Set-Cookie value carrying the signed credential.
    pub fn auth_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; HttpOnly; Path=/; Max-Age={}",
            self.cookie_name, token, self.expiration_seconds
        )
    }

    /// Set-Cookie value clearing the credential.
    pub fn clear_cookie(&self) -> String {
        format!("{}=; HttpOnly; Path=/; Max-Age=0", self.cookie_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new(
            "unit-test-secret",
            "travel-planner".to_string(),
            3600,
            "AUTH_TOKEN".to_string(),
        )
    }

    #[test]
    fn token_round_trip() {
        let jwt = service();
        let token = jwt.generate_token(42, "session-1").expect("token");
        let claims = jwt.validate(&token).expect("claims");
        assert_eq!(claims.uid, 42);
        assert_eq!(claims.jti, "session-1");
    }

    #[test]
    fn rejects_foreign_issuer() {
        let jwt = service();
        let other = JwtService::new(
            "unit-test-secret",
            "someone-else".to_string(),
            3600,
            "AUTH_TOKEN".to_string(),
        );
        let token = other.generate_token(42, "session-1").expect("token");
        assert!(jwt.validate(&token).is_none());
    }

    #[test]
    fn rejects_tampered_token() {
        let jwt = service();
        let mut token = jwt.generate_token(42, "session-1").expect("token");
        token.push('x');
        assert!(jwt.validate(&token).is_none());
    }

    #[test]
    fn cookie_values() {
        let jwt = service();
        assert!(jwt.auth_cookie("tok").starts_with("AUTH_TOKEN=tok; HttpOnly"));
        assert!(jwt.clear_cookie().contains("Max-Age=0"));
    }
}
