//! Catalog artifacts: the JSON documents work items read and write in the
//! object store (spec.md §6).
//!
//! A catalog is `{ stac_version, id, description, links: [...] }`, where
//! item links carry `rel="item"` and paginated aggregation catalogs chain
//! via `rel="prev"`/`rel="next"` sibling links. [`CatalogStore`]
//! generalizes the blob store spec.md §6 specifies at the interface level
//! only (`get`, `put`, `list`, `s3://bucket/key` URL construction); the
//! production implementation wraps `aws-sdk-s3`, grounded on the same SDK
//! family `golem-registry-service` uses for its object storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub const STAC_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogLink {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type")]
    pub link_type: Option<String>,
    pub title: Option<String>,
}

impl CatalogLink {
    pub fn item(href: impl Into<String>) -> Self {
        Self {
            rel: "item".to_string(),
            href: href.into(),
            link_type: None,
            title: None,
        }
    }

    pub fn sibling(rel: &str, href: impl Into<String>) -> Self {
        Self {
            rel: rel.to_string(),
            href: href.into(),
            link_type: None,
            title: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub stac_version: String,
    pub id: String,
    pub description: String,
    pub links: Vec<CatalogLink>,
}

impl Catalog {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            stac_version: STAC_VERSION.to_string(),
            id: id.into(),
            description: description.into(),
            links: Vec::new(),
        }
    }

    pub fn with_item_links(mut self, hrefs: impl IntoIterator<Item = String>) -> Self {
        self.links
            .extend(hrefs.into_iter().map(CatalogLink::item));
        self
    }

    /// Item hrefs only, ignoring `prev`/`next` sibling links. A malformed
    /// catalog whose `next` link points back at its own `id` is treated as
    /// a terminator rather than recursed into (spec.md §9's note on
    /// circular catalog parsing); callers walking a paginated chain must
    /// check the next catalog's `id` against ids already visited.
    pub fn item_hrefs(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| l.rel == "item")
            .map(|l| l.href.as_str())
            .collect()
    }

    pub fn next_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "next")
            .map(|l| l.href.as_str())
    }
}

/// Object key layout for one upstream work item's outputs (spec.md §6).
pub fn work_item_catalog_key(job_id: &uuid::Uuid, work_item_id: &uuid::Uuid) -> String {
    format!("{job_id}/{work_item_id}/outputs/catalog.json")
}

pub fn work_item_batch_catalog_key(job_id: &uuid::Uuid, work_item_id: &uuid::Uuid, page: usize) -> String {
    format!("{job_id}/{work_item_id}/outputs/catalog{page}.json")
}

pub fn aggregate_catalog_key(job_id: &uuid::Uuid, aggregating_item_id: &uuid::Uuid, page: usize) -> String {
    format!("{job_id}/aggregate-{aggregating_item_id}/outputs/catalog{page}.json")
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogStoreError {
    #[error("catalog store read failed: {0}")]
    Get(#[source] anyhow::Error),
    #[error("catalog store write failed: {0}")]
    Put(#[source] anyhow::Error),
    #[error("catalog store list failed: {0}")]
    List(#[source] anyhow::Error),
    #[error("object not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CatalogStoreError>;

/// Writes `hrefs` as one or more paginated catalog pages of at most
/// `page_size` item links each, chaining them with `rel="prev"`/`"next"`
/// sibling links (spec.md §4.3, §4.4, §6), and returns the URL of page 0 —
/// the location a downstream aggregating WorkItem should point at.
///
/// `key_fn(page)` builds the object key for a given page index (e.g.
/// [`aggregate_catalog_key`] or [`work_item_batch_catalog_key`] partially
/// applied). An empty `hrefs` still writes a single, linkless page 0 so
/// the caller always gets back a valid location.
pub async fn write_paginated_catalog(
    store: &dyn CatalogStore,
    key_fn: impl Fn(usize) -> String,
    id_prefix: &str,
    description: &str,
    hrefs: &[String],
    page_size: usize,
) -> Result<String> {
    let page_size = page_size.max(1);
    let pages: Vec<&[String]> = if hrefs.is_empty() {
        vec![&[][..]]
    } else {
        hrefs.chunks(page_size).collect()
    };

    let keys: Vec<String> = (0..pages.len()).map(&key_fn).collect();
    for (i, page) in pages.iter().enumerate() {
        let mut catalog =
            Catalog::new(format!("{id_prefix}{i}"), description.to_string()).with_item_links(page.iter().cloned());
        if i > 0 {
            catalog.links.push(CatalogLink::sibling("prev", store.url(&keys[i - 1])));
        }
        if i + 1 < pages.len() {
            catalog.links.push(CatalogLink::sibling("next", store.url(&keys[i + 1])));
        }
        store.put(&keys[i], &catalog).await?;
    }

    Ok(store.url(&keys[0]))
}

/// Blob store abstraction for catalog artifacts. All calls are
/// out-of-transaction I/O per spec.md §5: callers must resolve every
/// `get`/`put` before opening the DB transaction that records the result.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Catalog>;
    async fn put(&self, key: &str, catalog: &Catalog) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// `s3://bucket/key` URL construction (spec.md §6).
    fn url(&self, key: &str) -> String;
}

/// Production [`CatalogStore`], backed by `aws-sdk-s3`.
pub struct S3CatalogStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3CatalogStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl CatalogStore for S3CatalogStore {
    async fn get(&self, key: &str) -> Result<Catalog> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| CatalogStoreError::Get(anyhow::anyhow!(e)))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| CatalogStoreError::Get(anyhow::anyhow!(e)))?
            .into_bytes();
        serde_json::from_slice(&bytes).map_err(|e| CatalogStoreError::Get(anyhow::anyhow!(e)))
    }

    async fn put(&self, key: &str, catalog: &Catalog) -> Result<()> {
        let body = serde_json::to_vec(catalog).map_err(|e| CatalogStoreError::Put(anyhow::anyhow!(e)))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| CatalogStoreError::Put(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| CatalogStoreError::List(anyhow::anyhow!(e)))?;
        Ok(output
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_string))
            .collect())
    }

    fn url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// In-memory [`CatalogStore`] for tests.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    objects: Mutex<HashMap<String, Catalog>>,
    bucket: String,
}

impl InMemoryCatalogStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn get(&self, key: &str) -> Result<Catalog> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| CatalogStoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, catalog: &Catalog) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), catalog.clone());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_catalog() {
        let store = InMemoryCatalogStore::new("test-bucket");
        let catalog = Catalog::new("cat-1", "test").with_item_links(vec!["a".to_string(), "b".to_string()]);
        store.put("job/item/outputs/catalog.json", &catalog).await.unwrap();

        let read_back = store.get("job/item/outputs/catalog.json").await.unwrap();
        assert_eq!(read_back.item_hrefs(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = InMemoryCatalogStore::new("test-bucket");
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, CatalogStoreError::NotFound(_)));
    }

    #[test]
    fn url_uses_s3_scheme() {
        let store = InMemoryCatalogStore::new("test-bucket");
        assert_eq!(store.url("a/b"), "s3://test-bucket/a/b");
    }

    #[tokio::test]
    async fn paginated_catalog_chains_pages_with_prev_next_links() {
        let store = InMemoryCatalogStore::new("test-bucket");
        let hrefs: Vec<String> = (0..5).map(|i| format!("item-{i}")).collect();
        let first = write_paginated_catalog(&store, |p| format!("cat{p}.json"), "agg-", "agg", &hrefs, 2)
            .await
            .unwrap();
        assert_eq!(first, "s3://test-bucket/cat0.json");

        let page0 = store.get("cat0.json").await.unwrap();
        assert_eq!(page0.item_hrefs(), vec!["item-0", "item-1"]);
        assert_eq!(page0.next_href(), Some("s3://test-bucket/cat1.json"));

        let page2 = store.get("cat2.json").await.unwrap();
        assert_eq!(page2.item_hrefs(), vec!["item-4"]);
        assert!(page2.next_href().is_none());
    }

    #[tokio::test]
    async fn paginated_catalog_handles_empty_input() {
        let store = InMemoryCatalogStore::new("test-bucket");
        let first = write_paginated_catalog(&store, |p| format!("cat{p}.json"), "agg-", "agg", &[], 10)
            .await
            .unwrap();
        assert_eq!(first, "s3://test-bucket/cat0.json");
        assert!(store.get("cat0.json").await.unwrap().item_hrefs().is_empty());
    }

    #[test]
    fn next_href_detects_a_terminal_self_reference() {
        let mut catalog = Catalog::new("cat-1", "test");
        catalog.links.push(CatalogLink::sibling("next", "cat-1"));
        assert_eq!(catalog.next_href(), Some("cat-1"));
    }
}
