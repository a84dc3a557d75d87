// ── Core error types ──
//
// Per-key and per-call errors from gather-core. One outcome is shared by
// every caller waiting on the same key, so the type is `Clone` and carries
// rendered messages rather than transport error values. The
// `From<gather_api::Error>` impl translates transport-layer errors.

use thiserror::Error;

/// Message used when a transport failure carries no structured detail.
pub const UNABLE_TO_RETRIEVE: &str = "unable to retrieve";

/// Failure outcome for a single requested key or call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or HTTP failure. A chunk-level failure is reported to every
    /// key of that chunk.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    /// The key was requested but the response did not contain it.
    #[error("Not found: {key}")]
    NotFound { key: String },

    /// The key is malformed and was never sent.
    #[error("Invalid key: {reason}")]
    Validation { reason: String },

    /// The key was withdrawn from its window before dispatch.
    #[error("Request for {key} was invalidated before dispatch")]
    Invalidated { key: String },

    /// The batcher went away before the key was resolved.
    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Attach the key to a generic not-found produced below the key layer.
    pub(crate) fn for_key(self, key: &crate::model::Key) -> Self {
        match self {
            Self::NotFound { key: k } if k.is_empty() => Self::NotFound {
                key: key.to_string(),
            },
            other => other,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<gather_api::Error> for FetchError {
    fn from(err: gather_api::Error) -> Self {
        if err.is_not_found() {
            return FetchError::NotFound { key: String::new() };
        }

        match err {
            gather_api::Error::Http { status, detail } => FetchError::Transport {
                message: detail.unwrap_or_else(|| UNABLE_TO_RETRIEVE.into()),
                status: Some(status),
            },
            gather_api::Error::InvalidRequest(reason) => FetchError::Validation { reason },
            gather_api::Error::Transport(ref e) => FetchError::Transport {
                message: format!("{UNABLE_TO_RETRIEVE}: {e}"),
                status: e.status().map(|s| s.as_u16()),
            },
            gather_api::Error::InvalidUrl(e) => FetchError::Transport {
                message: format!("{UNABLE_TO_RETRIEVE}: invalid URL: {e}"),
                status: None,
            },
            gather_api::Error::Tls(msg) => FetchError::Transport {
                message: format!("{UNABLE_TO_RETRIEVE}: TLS error: {msg}"),
                status: None,
            },
            gather_api::Error::Deserialization { message, body: _ } => FetchError::Transport {
                message: format!("{UNABLE_TO_RETRIEVE}: malformed response: {message}"),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Key;

    #[test]
    fn http_detail_becomes_message() {
        let err = FetchError::from(gather_api::Error::Http {
            status: 500,
            detail: Some("index rebuilding".into()),
        });
        assert_eq!(
            err,
            FetchError::Transport {
                message: "index rebuilding".into(),
                status: Some(500),
            }
        );
    }

    #[test]
    fn http_without_detail_is_generic() {
        let err = FetchError::from(gather_api::Error::Http {
            status: 502,
            detail: None,
        });
        assert!(matches!(err, FetchError::Transport { ref message, .. } if message == UNABLE_TO_RETRIEVE));
    }

    #[test]
    fn http_404_maps_to_not_found() {
        let err = FetchError::from(gather_api::Error::Http {
            status: 404,
            detail: Some("gone".into()),
        })
        .for_key(&Key::id("t-9"));
        assert_eq!(err, FetchError::NotFound { key: "t-9".into() });
    }
}
