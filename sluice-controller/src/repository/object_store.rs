//! Object store repository
//!
//! Handles communication with the blob service:
//! - Checking and creating containers
//! - Listing container contents one page at a time
//! - Signing container and object URLs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sluice_core::domain::pool::Provisioned;
use sluice_core::domain::signing::{Permissions, ResourceRef, SignedUrl};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::service::signer::{ResourceUriSigner, SigningError};

/// Lifetime of the signatures that authenticate the store's own requests
const REQUEST_SIGNATURE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("blob service error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse blob service response: {0}")]
    Parse(String),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// One page of a container listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Object names in service order
    pub names: Vec<String>,

    /// Opaque cursor of the next page; `None` on the last page
    pub next_cursor: Option<String>,
}

/// Repository trait for the object store collaborator
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns whether the container exists
    async fn container_exists(&self, container: &str) -> Result<bool, StoreError>;

    /// Creates the container unless it already exists
    async fn create_container_if_absent(&self, container: &str) -> Result<Provisioned, StoreError>;

    /// Fetches one page of object names
    ///
    /// # Arguments
    /// * `container` - Container to list
    /// * `cursor` - Cursor returned by the previous page, `None` for the first page
    /// * `page_size` - Maximum number of names in the page
    async fn list_page(
        &self,
        container: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ObjectPage, StoreError>;

    /// Signs a container or object URL
    fn sign(
        &self,
        resource: &ResourceRef,
        permissions: Permissions,
        ttl: Duration,
    ) -> Result<SignedUrl, StoreError>;
}

/// HTTP implementation of ObjectStore
pub struct HttpObjectStore {
    client: Client,
    signer: ResourceUriSigner,
}

impl HttpObjectStore {
    pub fn new(signer: ResourceUriSigner) -> Self {
        Self::with_client(Client::new(), signer)
    }

    pub fn with_client(client: Client, signer: ResourceUriSigner) -> Self {
        Self { client, signer }
    }

    /// Container URL authenticated by a short-lived signature
    fn container_url(
        &self,
        container: &str,
        permissions: Permissions,
        params: &[(&str, &str)],
    ) -> Result<Url, StoreError> {
        let signed = self.signer.sign(
            &ResourceRef::container(container),
            permissions,
            REQUEST_SIGNATURE_TTL,
        )?;

        let mut url = Url::parse(&signed.url).map_err(|e| StoreError::Parse(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("restype", "container");
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn container_exists(&self, container: &str) -> Result<bool, StoreError> {
        let url = self.container_url(container, Permissions::READ, &[])?;
        let response = self.client.head(url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(api_error(status, response).await),
        }
    }

    async fn create_container_if_absent(&self, container: &str) -> Result<Provisioned, StoreError> {
        let url = self.container_url(container, Permissions::READ_WRITE_LIST, &[])?;
        let response = self.client.put(url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(Provisioned::Created),
            StatusCode::CONFLICT => Ok(Provisioned::AlreadyExists),
            status => Err(api_error(status, response).await),
        }
    }

    async fn list_page(
        &self,
        container: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ObjectPage, StoreError> {
        let max_results = page_size.to_string();
        let mut params = vec![("comp", "list"), ("maxresults", max_results.as_str())];
        if let Some(cursor) = cursor {
            params.push(("marker", cursor));
        }

        let url = self.container_url(container, Permissions::READ_LIST, &params)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let listing = response
            .json::<ListObjectsResponse>()
            .await
            .map_err(|e| StoreError::Parse(format!("invalid listing: {}", e)))?;

        Ok(listing.into())
    }

    fn sign(
        &self,
        resource: &ResourceRef,
        permissions: Permissions,
        ttl: Duration,
    ) -> Result<SignedUrl, StoreError> {
        Ok(self.signer.sign(resource, permissions, ttl)?)
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> StoreError {
    let message = response.text().await.unwrap_or_default();
    StoreError::Api {
        status: status.as_u16(),
        message,
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsResponse {
    #[serde(default)]
    items: Vec<ListedObject>,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

impl From<ListObjectsResponse> for ObjectPage {
    fn from(listing: ListObjectsResponse) -> Self {
        ObjectPage {
            names: listing.items.into_iter().map(|item| item.name).collect(),
            next_cursor: listing.next_marker.filter(|marker| !marker.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::signer::SharedKeyCredential;

    fn store() -> HttpObjectStore {
        HttpObjectStore::new(ResourceUriSigner::new(
            "https://acct.blob.example.net",
            SharedKeyCredential::new("acct", "dGVzdC1hY2NvdW50LWtleQ=="),
        ))
    }

    #[test]
    fn test_listing_with_empty_marker_is_last_page() {
        let listing: ListObjectsResponse =
            serde_json::from_str(r#"{"items":[{"name":"a.txt"},{"name":"b.txt"}],"nextMarker":""}"#)
                .unwrap();
        let page = ObjectPage::from(listing);

        assert_eq!(page.names, vec!["a.txt", "b.txt"]);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_listing_with_marker_has_next_page() {
        let listing: ListObjectsResponse =
            serde_json::from_str(r#"{"items":[],"nextMarker":"2!abc"}"#).unwrap();
        let page = ObjectPage::from(listing);

        assert!(page.names.is_empty());
        assert_eq!(page.next_cursor.as_deref(), Some("2!abc"));
    }

    #[test]
    fn test_container_url_carries_listing_parameters() {
        let url = store()
            .container_url(
                "input",
                Permissions::READ_LIST,
                &[("comp", "list"), ("marker", "m1")],
            )
            .unwrap();

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/input");
        assert_eq!(params["restype"], "container");
        assert_eq!(params["comp"], "list");
        assert_eq!(params["marker"], "m1");
        assert_eq!(params["sp"], "rl");
    }
}
