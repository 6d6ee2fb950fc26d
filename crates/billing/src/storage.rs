//! Blob storage client
//!
//! Uploads evidence images to the platform's object store and mints
//! presigned GET URLs. URLs are signed with HMAC-SHA256 over the storage
//! key and expiry and regenerated per request with a one-hour lifetime;
//! nothing long-lived is ever handed to a client.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Presigned GET URLs expire after one hour.
pub const PRESIGN_EXPIRY_SECS: i64 = 3600;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Public base URL of the object store, e.g. `https://media.studimed.id`.
    pub base_url: String,
    pub bucket: String,
    /// Bearer token for internal uploads.
    pub upload_token: String,
    /// Secret the store shares with us for URL signatures.
    pub signing_secret: String,
}

impl StorageConfig {
    pub fn from_env() -> BillingResult<Self> {
        let get = |key: &str| {
            std::env::var(key).map_err(|_| BillingError::Config(format!("{} is not set", key)))
        };

        Ok(Self {
            base_url: get("STORAGE_BASE_URL")?.trim_end_matches('/').to_string(),
            bucket: get("STORAGE_BUCKET")?,
            upload_token: get("STORAGE_UPLOAD_TOKEN")?,
            signing_secret: get("STORAGE_SIGNING_SECRET")?,
        })
    }
}

/// Client for the object store.
#[derive(Clone)]
pub struct BlobStorage {
    config: StorageConfig,
    http: reqwest::Client,
}

impl BlobStorage {
    pub fn new(config: StorageConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self { config, http }
    }

    /// Random, non-guessable storage key. Evidence URLs must not be
    /// enumerable even before signature checks.
    pub fn generate_key(&self, prefix: &str) -> String {
        let mut raw = [0u8; 16];
        rand::rng().fill_bytes(&mut raw);
        format!("{}/{}", prefix, hex::encode(raw))
    }

    /// Upload bytes under the given key.
    pub async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> BillingResult<()> {
        let url = format!("{}/{}/{}", self.config.base_url, self.config.bucket, key);

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.config.upload_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| BillingError::Storage(format!("upload failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BillingError::Storage(format!(
                "upload rejected with status {}",
                response.status()
            )));
        }

        tracing::debug!(key = %key, "Blob uploaded");

        Ok(())
    }

    fn signature(&self, key: &str, expires: i64) -> BillingResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.signing_secret.as_bytes())
            .map_err(|_| BillingError::Storage("invalid signing secret".into()))?;
        mac.update(format!("{}\n{}", key, expires).as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Mint a presigned GET URL for a stored object.
    pub fn presign_get(&self, key: &str) -> BillingResult<String> {
        let expires = OffsetDateTime::now_utc().unix_timestamp() + PRESIGN_EXPIRY_SECS;
        let signature = self.signature(key, expires)?;

        Ok(format!(
            "{}/{}/{}?expires={}&signature={}",
            self.config.base_url, self.config.bucket, key, expires, signature
        ))
    }

    /// Check a signature the store would receive. The store performs the
    /// same computation; this mirror keeps the scheme testable end to end.
    pub fn verify_presign(&self, key: &str, expires: i64, signature: &str) -> BillingResult<bool> {
        if expires < OffsetDateTime::now_utc().unix_timestamp() {
            return Ok(false);
        }
        let expected = self.signature(key, expires)?;
        Ok(expected.as_bytes().ct_eq(signature.as_bytes()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> BlobStorage {
        BlobStorage::new(StorageConfig {
            base_url: "https://media.test".to_string(),
            bucket: "evidence".to_string(),
            upload_token: "upload-token".to_string(),
            signing_secret: "signing-secret".to_string(),
        })
    }

    #[test]
    fn test_generated_keys_are_unique_and_prefixed() {
        let storage = test_storage();
        let a = storage.generate_key("payment_evidence");
        let b = storage.generate_key("payment_evidence");
        assert!(a.starts_with("payment_evidence/"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_presign_round_trip() {
        let storage = test_storage();
        let url = storage.presign_get("payment_evidence/abc").unwrap();

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0i64;
        let mut signature = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v.to_string(),
                _ => {}
            }
        }

        assert!(storage
            .verify_presign("payment_evidence/abc", expires, &signature)
            .unwrap());
    }

    #[test]
    fn test_presign_rejects_altered_key() {
        let storage = test_storage();
        let expires = OffsetDateTime::now_utc().unix_timestamp() + 600;
        let signature = storage.signature("payment_evidence/abc", expires).unwrap();

        assert!(!storage
            .verify_presign("payment_evidence/other", expires, &signature)
            .unwrap());
    }

    #[test]
    fn test_presign_rejects_expired_signature() {
        let storage = test_storage();
        let expires = OffsetDateTime::now_utc().unix_timestamp() - 1;
        let signature = storage.signature("payment_evidence/abc", expires).unwrap();

        assert!(!storage
            .verify_presign("payment_evidence/abc", expires, &signature)
            .unwrap());
    }

    #[test]
    fn test_different_secrets_produce_different_signatures() {
        let storage = test_storage();
        let other = BlobStorage::new(StorageConfig {
            base_url: "https://media.test".to_string(),
            bucket: "evidence".to_string(),
            upload_token: "upload-token".to_string(),
            signing_secret: "another-secret".to_string(),
        });

        let expires = OffsetDateTime::now_utc().unix_timestamp() + 600;
        let signature = other.signature("payment_evidence/abc", expires).unwrap();

        assert!(!storage
            .verify_presign("payment_evidence/abc", expires, &signature)
            .unwrap());
    }
}
