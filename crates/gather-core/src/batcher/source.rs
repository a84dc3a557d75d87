// ── Batch sources ──
//
// The seam between a KeyBatcher and whatever answers its requests.
// `HttpSource` binds one resource of the catalog API in id or path mode.

use std::future::Future;

use gather_api::ApiClient;
use serde_json::Value;
use tracing::debug;

use crate::error::{FetchError, UNABLE_TO_RETRIEVE};
use crate::model::{Entity, Key, KeyKind};

/// Answers single-key and bulk lookups for a `KeyBatcher`.
///
/// Errors are already `FetchError`s: raw transport outcomes are converted
/// at this boundary, so the batcher never inspects response shapes.
pub trait BatchSource: Send + Sync + 'static {
    type Entity: Send + Sync + 'static;

    /// Resolve exactly one key. Used when a window holds a single key.
    fn fetch_one(&self, key: &Key) -> impl Future<Output = Result<Self::Entity, FetchError>> + Send;

    /// Resolve up to one chunk of keys in a single call. Keys missing from
    /// the returned entities resolve as not found.
    fn fetch_many(
        &self,
        keys: &[Key],
    ) -> impl Future<Output = Result<Vec<Self::Entity>, FetchError>> + Send;

    /// The key a returned entity answers, used to correlate bulk responses.
    fn key_of(&self, entity: &Self::Entity) -> Option<Key>;

    /// Whether this source can serve `key` at all.
    fn accepts(&self, _key: &Key) -> bool {
        true
    }

    /// Short name used in log fields.
    fn label(&self) -> String {
        "source".into()
    }
}

// ── HTTP source ──────────────────────────────────────────────────────

/// One resource of the catalog API, addressed by id or by path.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: ApiClient,
    resource: String,
    kind: KeyKind,
    correlation_field: String,
}

impl HttpSource {
    /// `GET /<resource>/<id>` and `POST /<resource>/by-ids`, correlated on `id`.
    pub fn by_id(client: ApiClient, resource: impl Into<String>) -> Self {
        Self {
            client,
            resource: resource.into(),
            kind: KeyKind::Id,
            correlation_field: "id".into(),
        }
    }

    /// `GET /<resource>/by-path/...` and `POST /<resource>/by-paths`,
    /// correlated on `path`.
    pub fn by_path(client: ApiClient, resource: impl Into<String>) -> Self {
        Self {
            client,
            resource: resource.into(),
            kind: KeyKind::Path,
            correlation_field: "path".into(),
        }
    }

    /// Correlate bulk responses on a different entity field.
    pub fn with_correlation_field(mut self, field: impl Into<String>) -> Self {
        self.correlation_field = field.into();
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    fn convert(&self, err: gather_api::Error) -> FetchError {
        debug!(
            resource = %self.resource,
            status = ?err.status(),
            transient = err.is_transient(),
            error = %err,
            "request failed"
        );
        FetchError::from(err)
    }
}

impl BatchSource for HttpSource {
    type Entity = Entity;

    async fn fetch_one(&self, key: &Key) -> Result<Entity, FetchError> {
        let result = match key {
            Key::Id(id) => self.client.get_one(&self.resource, id).await,
            Key::Path(path) => self.client.get_by_path(&self.resource, path).await,
        };
        result.map_err(|e| self.convert(e).for_key(key))
    }

    async fn fetch_many(&self, keys: &[Key]) -> Result<Vec<Entity>, FetchError> {
        let result = match self.kind {
            KeyKind::Id => {
                let ids: Vec<String> = keys.iter().filter_map(Key::as_id).map(str::to_owned).collect();
                self.client.post_by_ids(&self.resource, &ids).await
            }
            KeyKind::Path => {
                let paths: Vec<Vec<String>> =
                    keys.iter().filter_map(Key::as_path).map(<[String]>::to_vec).collect();
                self.client.post_by_paths(&self.resource, &paths).await
            }
        };

        // A 404 here means the bulk route itself is missing, which is a
        // failure of the whole chunk rather than of any one key.
        result.map_err(|e| match self.convert(e) {
            FetchError::NotFound { .. } => FetchError::Transport {
                message: format!("{UNABLE_TO_RETRIEVE}: bulk endpoint not found"),
                status: Some(404),
            },
            other => other,
        })
    }

    fn key_of(&self, entity: &Entity) -> Option<Key> {
        let field = entity.get(&self.correlation_field)?;
        match self.kind {
            KeyKind::Id => match field {
                Value::String(s) => Some(Key::Id(s.clone())),
                Value::Number(n) => Some(Key::Id(n.to_string())),
                _ => None,
            },
            KeyKind::Path => {
                let segments = field
                    .as_array()?
                    .iter()
                    .map(|v| v.as_str().map(str::to_owned))
                    .collect::<Option<Vec<_>>>()?;
                Some(Key::Path(segments))
            }
        }
    }

    fn accepts(&self, key: &Key) -> bool {
        key.kind() == self.kind
    }

    fn label(&self) -> String {
        match self.kind {
            KeyKind::Id => format!("{}/by-ids", self.resource),
            KeyKind::Path => format!("{}/by-paths", self.resource),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn client() -> ApiClient {
        ApiClient::from_reqwest("https://catalog.example/", reqwest::Client::new()).unwrap()
    }

    #[test]
    fn id_correlation_accepts_numbers() {
        let source = HttpSource::by_id(client(), "users");
        assert_eq!(source.key_of(&json!({ "id": "u-1" })), Some(Key::id("u-1")));
        assert_eq!(source.key_of(&json!({ "id": 42 })), Some(Key::id("42")));
        assert_eq!(source.key_of(&json!({ "name": "no id" })), None);
    }

    #[test]
    fn path_correlation_requires_string_segments() {
        let source = HttpSource::by_path(client(), "trees");
        assert_eq!(
            source.key_of(&json!({ "path": ["a", "b"] })),
            Some(Key::path(["a", "b"]))
        );
        assert_eq!(source.key_of(&json!({ "path": ["a", 1] })), None);
        assert_eq!(source.key_of(&json!({ "path": "a/b" })), None);
    }

    #[test]
    fn custom_correlation_field() {
        let source = HttpSource::by_id(client(), "datasets").with_correlation_field("uuid");
        assert_eq!(source.key_of(&json!({ "uuid": "d-7" })), Some(Key::id("d-7")));
    }

    #[test]
    fn accepts_only_matching_kind() {
        let source = HttpSource::by_id(client(), "tags");
        assert!(source.accepts(&Key::id("t")));
        assert!(!source.accepts(&Key::path(["t"])));
        assert_eq!(source.label(), "tags/by-ids");
    }
}
