// Async HTTP client for the catalog retrieval endpoints.
//
//   GET  /<resource>/<id>
//   GET  /<resource>/by-path/<segment>/<segment>/...
//   POST /<resource>/by-ids     body: ["id", ...]          -> {data: [...]}
//   POST /<resource>/by-paths   body: [["a","b"], ...]     -> {data: [...]}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

// ── Wire shapes ──────────────────────────────────────────────────────

/// Envelope returned by the bulk endpoints.
#[derive(Debug, Deserialize)]
pub struct Bulk<T> {
    pub data: Vec<T>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for single-item and bulk retrieval.
///
/// Cheap to clone; `reqwest::Client` pools connections internally.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from a base URL and transport config.
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::from_reqwest(base_url, http)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let url = Url::parse(raw)?;
        if url.cannot_be_a_base() {
            return Err(Error::InvalidRequest(format!("not a base URL: {raw}")));
        }
        Ok(url)
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Append `segments` to the base path. Each segment is percent-encoded,
    /// including any `/` it contains.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidRequest(format!("not a base URL: {}", self.base_url)))?;
            path.pop_if_empty();
            for segment in segments {
                if segment.is_empty() {
                    return Err(Error::InvalidRequest("empty path segment".into()));
                }
                path.push(segment);
            }
        }
        Ok(url)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        Self::handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, Error> {
        debug!("POST {url}");

        let resp = self.http.post(url).json(body).send().await?;
        Self::handle_response(resp).await
    }

    // ── Response handling ────────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            serde_json::from_str(&body).map_err(|e| {
                let preview: String = body.chars().take(200).collect();
                Error::Deserialization {
                    message: format!("{e} (body preview: {preview:?})"),
                    body,
                }
            })
        } else {
            Err(Self::parse_error(status, resp).await)
        }
    }

    async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        let raw = resp.text().await.unwrap_or_default();

        let detail = serde_json::from_str::<ErrorResponse>(&raw)
            .ok()
            .and_then(|err| err.detail.or(err.message));

        Error::Http {
            status: status.as_u16(),
            detail,
        }
    }

    // ━━ Public API ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `GET /<resource>/<id>`
    pub async fn get_one<T: DeserializeOwned>(&self, resource: &str, id: &str) -> Result<T, Error> {
        let url = self.url([resource, id])?;
        self.get(url).await
    }

    /// `GET /<resource>/by-path/<segment>/...`
    pub async fn get_by_path<T: DeserializeOwned>(
        &self,
        resource: &str,
        path: &[String],
    ) -> Result<T, Error> {
        if path.is_empty() {
            return Err(Error::InvalidRequest("empty path".into()));
        }
        let segments = [resource, "by-path"]
            .into_iter()
            .chain(path.iter().map(String::as_str));
        let url = self.url(segments)?;
        self.get(url).await
    }

    /// `POST /<resource>/by-ids`
    pub async fn post_by_ids<T: DeserializeOwned>(
        &self,
        resource: &str,
        ids: &[String],
    ) -> Result<Vec<T>, Error> {
        let url = self.url([resource, "by-ids"])?;
        let bulk: Bulk<T> = self.post(url, ids).await?;
        debug!(requested = ids.len(), returned = bulk.data.len(), "bulk by ids");
        Ok(bulk.data)
    }

    /// `POST /<resource>/by-paths`
    pub async fn post_by_paths<T: DeserializeOwned>(
        &self,
        resource: &str,
        paths: &[Vec<String>],
    ) -> Result<Vec<T>, Error> {
        let url = self.url([resource, "by-paths"])?;
        let bulk: Bulk<T> = self.post(url, paths).await?;
        debug!(requested = paths.len(), returned = bulk.data.len(), "bulk by paths");
        Ok(bulk.data)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::from_reqwest(base, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn url_joins_onto_base_path() {
        let c = client("https://catalog.example/api/v2/");
        let url = c.url(["tags", "abc"]).unwrap();
        assert_eq!(url.as_str(), "https://catalog.example/api/v2/tags/abc");
    }

    #[test]
    fn url_without_trailing_slash() {
        let c = client("https://catalog.example/api");
        let url = c.url(["tags", "by-ids"]).unwrap();
        assert_eq!(url.path(), "/api/tags/by-ids");
    }

    #[test]
    fn url_percent_encodes_segments() {
        let c = client("https://catalog.example/");
        let url = c.url(["trees", "by-path", "a b", "c/d"]).unwrap();
        assert_eq!(url.path(), "/trees/by-path/a%20b/c%2Fd");
    }

    #[test]
    fn empty_segment_is_rejected() {
        let c = client("https://catalog.example/");
        assert!(matches!(c.url(["tags", ""]), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn non_base_url_is_rejected() {
        let err = ApiClient::from_reqwest("mailto:ops@example.com", reqwest::Client::new());
        assert!(matches!(err, Err(Error::InvalidRequest(_))));
    }
}
