//! JWT issuance and verification
//!
//! Users are provisioned by the main platform; this API only verifies the
//! bearer tokens it issued and reads identity and role from the claims.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// `student` or `admin`
    pub role: String,
    pub email: Option<String>,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Issued at, seconds since epoch
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> ApiResult<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ApiError::Unauthorized("invalid token subject".to_string()))
    }
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        role: &str,
        email: Option<&str>,
    ) -> ApiResult<String> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            email: email.map(String::from),
            exp: now + self.expiry_hours * 3600,
            iat: now,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("token encoding: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("invalid or expired token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROLE_ADMIN, ROLE_STUDENT};

    fn manager() -> JwtManager {
        JwtManager::new("0123456789abcdef0123456789abcdef", 24)
    }

    #[test]
    fn test_token_round_trip() {
        let manager = manager();
        let user_id = Uuid::new_v4();

        let token = manager
            .generate_token(user_id, ROLE_STUDENT, Some("dina@studimed.id"))
            .unwrap();
        let claims = manager.verify_token(&token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.role, ROLE_STUDENT);
        assert_eq!(claims.email.as_deref(), Some("dina@studimed.id"));
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_rejected_with_wrong_secret() {
        let token = manager()
            .generate_token(Uuid::new_v4(), ROLE_ADMIN, None)
            .unwrap();

        let other = JwtManager::new("ffffffffffffffffffffffffffffffff", 24);
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Negative expiry backdates the token past the default leeway.
        let manager = JwtManager::new("0123456789abcdef0123456789abcdef", -1);
        let token = manager
            .generate_token(Uuid::new_v4(), ROLE_STUDENT, None)
            .unwrap();

        assert!(manager.verify_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(manager().verify_token("not-a-jwt").is_err());
    }
}
