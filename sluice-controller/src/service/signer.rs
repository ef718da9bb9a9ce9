//! Resource URI Signer
//!
//! Produces time-bounded, permission-scoped URLs for containers and objects,
//! and the shared-key request signatures used against the compute service.
//!
//! Signatures are HMAC-SHA256 over a newline-joined string-to-sign, keyed by
//! the base64-decoded account key. The key is decoded on every signing call,
//! so a broken credential surfaces as a signing failure of the submission
//! that needed it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sluice_core::domain::signing::{Permissions, ResourceRef, SignedUrl};
use std::time::Duration;
use thiserror::Error;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Signed-version parameter carried by every URL
pub const SIGNED_VERSION: &str = "2021-08-06";

/// Default lifetime of signed URLs handed to tasks
pub const DEFAULT_SIGNATURE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid credential for account '{account}': {reason}")]
    InvalidCredential { account: String, reason: String },

    #[error("refusing to sign with an empty permission set")]
    EmptyPermissions,

    #[error("signature lifetime must be positive")]
    InvalidTtl,

    #[error("invalid service endpoint '{0}'")]
    InvalidEndpoint(String),
}

/// Account name plus base64 account key
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: String,
}

impl SharedKeyCredential {
    pub fn new(account: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            key: key.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64 HMAC-SHA256 of `payload`
    pub fn sign(&self, payload: &str) -> Result<String, SigningError> {
        let invalid = |reason: String| SigningError::InvalidCredential {
            account: self.account.clone(),
            reason,
        };

        if self.key.trim().is_empty() {
            return Err(invalid("account key is empty".to_string()));
        }

        let key = BASE64
            .decode(self.key.trim())
            .map_err(|e| invalid(format!("account key is not base64: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(&key).map_err(|e| invalid(e.to_string()))?;
        mac.update(payload.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Issues signed URLs rooted at one blob service endpoint
#[derive(Debug, Clone)]
pub struct ResourceUriSigner {
    endpoint: String,
    credential: SharedKeyCredential,
}

impl ResourceUriSigner {
    /// # Arguments
    /// * `endpoint` - Blob service endpoint (e.g. "https://acct.blob.core.windows.net")
    /// * `credential` - Shared key of the storage account
    pub fn new(endpoint: impl Into<String>, credential: SharedKeyCredential) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Signs `resource` for `permissions`, valid from now for `ttl`
    pub fn sign(
        &self,
        resource: &ResourceRef,
        permissions: Permissions,
        ttl: Duration,
    ) -> Result<SignedUrl, SigningError> {
        self.sign_at(resource, permissions, ttl, Utc::now())
    }

    /// Same as [`sign`](Self::sign) with an explicit clock reading
    pub fn sign_at(
        &self,
        resource: &ResourceRef,
        permissions: Permissions,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, SigningError> {
        if permissions.is_empty() {
            return Err(SigningError::EmptyPermissions);
        }

        let ttl = chrono::Duration::from_std(ttl).map_err(|_| SigningError::InvalidTtl)?;
        if ttl <= chrono::Duration::zero() {
            return Err(SigningError::InvalidTtl);
        }

        // The wire format has second precision
        let starts_at = now.trunc_subsecs(0);
        let expires_at = starts_at + ttl;

        let sp = permissions.as_signed_string();
        let st = format_timestamp(starts_at);
        let se = format_timestamp(expires_at);
        let sr = resource.kind_code();

        let string_to_sign = [
            sp.as_str(),
            st.as_str(),
            se.as_str(),
            &format!("/blob/{}/{}", self.credential.account(), resource.path()),
            sr,
            SIGNED_VERSION,
        ]
        .join("\n");
        let sig = self.credential.sign(&string_to_sign)?;

        let mut url = self.resource_url(resource)?;
        url.query_pairs_mut()
            .append_pair("sv", SIGNED_VERSION)
            .append_pair("sr", sr)
            .append_pair("sp", &sp)
            .append_pair("st", &st)
            .append_pair("se", &se)
            .append_pair("sig", &sig);

        Ok(SignedUrl {
            url: url.to_string(),
            permissions,
            starts_at,
            expires_at,
        })
    }

    fn resource_url(&self, resource: &ResourceRef) -> Result<Url, SigningError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|_| SigningError::InvalidEndpoint(self.endpoint.clone()))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SigningError::InvalidEndpoint(self.endpoint.clone()))?;
            segments.pop_if_empty();
            segments.push(resource.container_name());
            if let ResourceRef::Object { name, .. } = resource {
                segments.extend(name.split('/'));
            }
        }

        Ok(url)
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
