//! Work Item Enumerator
//!
//! Turns a container listing into a lazy stream of signed work items. Pages
//! are fetched on demand; the stream ends when the service returns no
//! continuation cursor.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sluice_core::domain::signing::{Permissions, ResourceRef};
use sluice_core::domain::work_item::WorkItem;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::repository::object_store::{ObjectStore, StoreError};
use crate::service::signer::DEFAULT_SIGNATURE_TTL;

/// Maximum number of names requested per page
pub const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("failed to list container page: {0}")]
    Page(#[source] StoreError),

    #[error("failed to sign work item '{name}': {source}")]
    Signing {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("listing cursor '{0}' did not advance")]
    CursorStalled(String),
}

enum Cursor {
    Start,
    Next(String),
    Exhausted,
}

#[derive(Clone)]
pub struct WorkItemEnumerator {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
    ttl: Duration,
}

impl WorkItemEnumerator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
            ttl: DEFAULT_SIGNATURE_TTL,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Lifetime of the read URLs attached to each item
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Lists `container` lazily, one page per poll of an exhausted buffer
    ///
    /// Each call starts from the first page. The first error ends the stream.
    pub fn enumerate(&self, container: &str) -> BoxStream<'static, Result<WorkItem, EnumerationError>> {
        let store = Arc::clone(&self.store);
        let container = container.to_string();
        let page_size = self.page_size;
        let ttl = self.ttl;

        stream::try_unfold(Cursor::Start, move |cursor| {
            let store = Arc::clone(&store);
            let container = container.clone();

            async move {
                let current = match cursor {
                    Cursor::Start => None,
                    Cursor::Next(cursor) => Some(cursor),
                    Cursor::Exhausted => return Ok(None),
                };

                let page = store
                    .list_page(&container, current.as_deref(), page_size)
                    .await
                    .map_err(EnumerationError::Page)?;

                tracing::debug!(
                    "Listed {} object(s) from container {} (more: {})",
                    page.names.len(),
                    container,
                    page.next_cursor.is_some()
                );

                let mut next = match page.next_cursor {
                    None => Cursor::Exhausted,
                    Some(next) if current.as_deref() == Some(next.as_str()) => {
                        return Err(EnumerationError::CursorStalled(next));
                    }
                    Some(next) => Cursor::Next(next),
                };

                let mut items = Vec::with_capacity(page.names.len());
                for name in page.names {
                    match store.sign(&ResourceRef::object(&container, &name), Permissions::READ_LIST, ttl) {
                        Ok(url) => items.push(Ok(WorkItem::new(url, &name))),
                        Err(source) => {
                            items.push(Err(EnumerationError::Signing { name, source }));
                            next = Cursor::Exhausted;
                            break;
                        }
                    }
                }

                Ok(Some((items, next)))
            }
        })
        .map_ok(stream::iter)
        .try_flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fakes::FakeObjectStore;

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("item-{:03}.txt", i)).collect()
    }

    fn store_with(objects: &[String]) -> FakeObjectStore {
        let refs: Vec<&str> = objects.iter().map(String::as_str).collect();
        FakeObjectStore::default().with_container("input", &refs)
    }

    #[tokio::test]
    async fn test_yields_every_page_in_order() {
        // 3 pages of 4, last one partial
        let objects = names(10);
        let store = Arc::new(store_with(&objects));
        let enumerator = WorkItemEnumerator::new(store.clone()).with_page_size(4);

        let items: Vec<WorkItem> = enumerator.enumerate("input").try_collect().await.unwrap();

        let seen: Vec<&str> = items.iter().map(|i| i.relative_name.as_str()).collect();
        assert_eq!(seen, objects.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(store.page_requests(), 3);
    }

    #[tokio::test]
    async fn test_items_carry_read_list_urls() {
        let store = Arc::new(store_with(&["/nested/a.txt".to_string()]));
        let enumerator = WorkItemEnumerator::new(store);

        let items: Vec<WorkItem> = enumerator.enumerate("input").try_collect().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].relative_name, "nested/a.txt");
        assert_eq!(items[0].source.permissions, Permissions::READ_LIST);
        assert!(items[0].source.expires_at > items[0].source.starts_at);
    }

    #[tokio::test]
    async fn test_empty_container() {
        let store = Arc::new(store_with(&[]));
        let enumerator = WorkItemEnumerator::new(store.clone());

        let items: Vec<WorkItem> = enumerator.enumerate("input").try_collect().await.unwrap();

        assert!(items.is_empty());
        assert_eq!(store.page_requests(), 1);
    }

    #[tokio::test]
    async fn test_pages_are_fetched_lazily() {
        let store = Arc::new(store_with(&names(10)));
        let enumerator = WorkItemEnumerator::new(store.clone()).with_page_size(4);

        let first: Vec<WorkItem> = enumerator.enumerate("input").take(2).try_collect().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(store.page_requests(), 1);
    }

    #[tokio::test]
    async fn test_page_failure_ends_stream_after_yielded_items() {
        let mut store = store_with(&names(10));
        store.fail_page = Some(1);
        let enumerator = WorkItemEnumerator::new(Arc::new(store)).with_page_size(4);

        let results: Vec<_> = enumerator.enumerate("input").collect().await;

        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(Result::is_ok));
        assert!(matches!(results[4], Err(EnumerationError::Page(_))));
    }

    #[tokio::test]
    async fn test_signing_failure_ends_stream() {
        let mut store = store_with(&names(6));
        store.fail_sign = Some("item-001.txt".to_string());
        let enumerator = WorkItemEnumerator::new(Arc::new(store)).with_page_size(4);

        let results: Vec<_> = enumerator.enumerate("input").collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            &results[1],
            Err(EnumerationError::Signing { name, .. }) if name == "item-001.txt"
        ));
    }

    #[tokio::test]
    async fn test_enumeration_is_restartable() {
        let store = Arc::new(store_with(&names(5)));
        let enumerator = WorkItemEnumerator::new(store).with_page_size(2);

        let first: Vec<WorkItem> = enumerator.enumerate("input").try_collect().await.unwrap();
        let second: Vec<WorkItem> = enumerator.enumerate("input").try_collect().await.unwrap();

        assert_eq!(first.len(), 5);
        assert_eq!(
            first.iter().map(|i| &i.relative_name).collect::<Vec<_>>(),
            second.iter().map(|i| &i.relative_name).collect::<Vec<_>>()
        );
    }
}
