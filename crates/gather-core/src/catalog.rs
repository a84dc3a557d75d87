// ── Catalog facade ──
//
// One API client, one batcher per (resource, key kind). Batchers are
// created on first use and live as long as the catalog.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use gather_api::ApiClient;
use tracing::{debug, info};

use crate::batcher::{HttpSource, Invalidate, KeyBatcher, KeyResult, Pending};
use crate::config::{BatcherConfig, CatalogConfig, FlushPolicy};
use crate::error::FetchError;
use crate::model::{Entity, Key, KeyKind};

type Endpoint = (String, KeyKind);

/// Entry point for fetching catalog entities.
///
/// Cheaply cloneable via `Arc<CatalogInner>`. Every caller asking for the
/// same resource and key kind shares one `KeyBatcher`, so lookups issued
/// in the same scheduler turn are coalesced across callers.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    client: ApiClient,
    batcher: BatcherConfig,
    batchers: DashMap<Endpoint, KeyBatcher<HttpSource>>,
}

impl Catalog {
    /// Build the HTTP client described by `config`.
    pub fn new(config: &CatalogConfig) -> Result<Self, FetchError> {
        let client = ApiClient::new(config.client.base_url.as_str(), &config.client.transport())?;
        info!(base_url = %config.client.base_url, "catalog ready");
        Ok(Self::from_client(client, config.batcher))
    }

    /// Use an already built client.
    pub fn from_client(client: ApiClient, batcher: BatcherConfig) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                client,
                batcher,
                batchers: DashMap::new(),
            }),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    /// The id-mode batcher for `resource`.
    pub fn by_id(&self, resource: &str) -> KeyBatcher<HttpSource> {
        self.batcher(resource, KeyKind::Id)
    }

    /// The path-mode batcher for `resource`.
    pub fn by_path(&self, resource: &str) -> KeyBatcher<HttpSource> {
        self.batcher(resource, KeyKind::Path)
    }

    /// Request one entity, routed to the batcher matching the key's kind.
    pub fn get(&self, resource: &str, key: impl Into<Key>) -> Pending<Entity> {
        let key = key.into();
        self.batcher(resource, key.kind()).request(key)
    }

    /// Request several entities of one kind and wait for all of them.
    ///
    /// Under a manual flush policy the window is flushed once every key
    /// has been queued.
    pub async fn get_all<I, K>(&self, resource: &str, kind: KeyKind, keys: I) -> Vec<KeyResult<Entity>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let batcher = self.batcher(resource, kind);
        let pending = batcher.request_many(keys);
        if batcher.config().flush == FlushPolicy::Manual {
            batcher.flush().await;
        }
        join_all(pending).await
    }

    /// Invalidate pending lookups on both batchers of `resource`.
    pub fn invalidate(&self, resource: &str, target: &Invalidate) {
        for kind in [KeyKind::Id, KeyKind::Path] {
            if let Some(batcher) = self.inner.batchers.get(&(resource.to_owned(), kind)) {
                batcher.invalidate(target);
            }
        }
    }

    /// Number of batchers created so far.
    pub fn endpoint_count(&self) -> usize {
        self.inner.batchers.len()
    }

    fn batcher(&self, resource: &str, kind: KeyKind) -> KeyBatcher<HttpSource> {
        self.inner
            .batchers
            .entry((resource.to_owned(), kind))
            .or_insert_with(|| {
                let source = match kind {
                    KeyKind::Id => HttpSource::by_id(self.inner.client.clone(), resource),
                    KeyKind::Path => HttpSource::by_path(self.inner.client.clone(), resource),
                };
                debug!(resource, ?kind, "creating batcher");
                KeyBatcher::new(source, self.inner.batcher)
            })
            .clone()
    }
}
