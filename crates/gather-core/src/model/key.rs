// ── Request keys ──
//
// A Key names one requested entity: a flat id or an ordered path.
// Path keys compare structurally; `canonical()` gives the stable string
// form used to de-duplicate keys inside a coalescing window.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Identifier for a single requested entity.
///
/// Serializes untagged: an id is a JSON string, a path a JSON array of
/// strings, matching the bulk endpoint request bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Id(String),
    Path(Vec<String>),
}

/// Which addressing scheme a key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Id,
    Path,
}

impl Key {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Path(segments.into_iter().map(Into::into).collect())
    }

    /// Split a slash-separated string into a path key. Empty segments
    /// (leading, trailing or doubled slashes) are dropped.
    pub fn parse_path(raw: &str) -> Self {
        Self::path(raw.split('/').filter(|s| !s.is_empty()))
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Id(_) => KeyKind::Id,
            Self::Path(_) => KeyKind::Path,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Self::Id(s) => Some(s),
            Self::Path(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&[String]> {
        match self {
            Self::Path(p) => Some(p),
            Self::Id(_) => None,
        }
    }

    /// Stable serialized form. Equal keys always produce equal strings,
    /// and an id never collides with a one-segment path.
    pub fn canonical(&self) -> String {
        match self {
            Self::Id(id) => format!("id:{id}"),
            Self::Path(segments) => {
                let encoded = serde_json::to_string(segments).unwrap_or_default();
                format!("path:{encoded}")
            }
        }
    }

    /// Reject keys that can never address an entity.
    pub fn validate(&self) -> Result<(), FetchError> {
        match self {
            Self::Id(id) if id.trim().is_empty() => Err(FetchError::Validation {
                reason: "id must not be empty".into(),
            }),
            Self::Path(segments) if segments.is_empty() => Err(FetchError::Validation {
                reason: "path must have at least one segment".into(),
            }),
            Self::Path(segments) if segments.iter().any(String::is_empty) => {
                Err(FetchError::Validation {
                    reason: format!("path {self} contains an empty segment"),
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Path(segments) => write!(f, "/{}", segments.join("/")),
        }
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Id(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Id(s.to_owned())
    }
}

impl From<Vec<String>> for Key {
    fn from(segments: Vec<String>) -> Self {
        Self::Path(segments)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn path_keys_compare_structurally() {
        let a = Key::path(["datasets", "climate"]);
        let b = Key::Path(vec!["datasets".to_owned(), "climate".to_owned()]);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn id_and_single_segment_path_differ() {
        let id = Key::id("climate");
        let path = Key::path(["climate"]);
        assert_ne!(id.canonical(), path.canonical());
    }

    #[test]
    fn canonical_preserves_segment_boundaries() {
        let a = Key::path(["a/b", "c"]);
        let b = Key::path(["a", "b/c"]);
        assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn parse_path_drops_empty_segments() {
        assert_eq!(Key::parse_path("/root//leaf/"), Key::path(["root", "leaf"]));
    }

    #[test]
    fn validate_rejects_malformed_keys() {
        assert!(Key::id("").validate().is_err());
        assert!(Key::id("  ").validate().is_err());
        assert!(Key::Path(Vec::new()).validate().is_err());
        assert!(Key::path(["a", ""]).validate().is_err());
        assert!(Key::path(["a", "b"]).validate().is_ok());
        assert!(Key::id("t-1").validate().is_ok());
    }

    #[test]
    fn serializes_untagged() {
        assert_eq!(serde_json::to_string(&Key::id("x")).unwrap(), r#""x""#);
        assert_eq!(
            serde_json::to_string(&Key::path(["a", "b"])).unwrap(),
            r#"["a","b"]"#
        );
        let back: Key = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(back, Key::path(["a", "b"]));
    }

    #[test]
    fn display() {
        assert_eq!(Key::id("t-1").to_string(), "t-1");
        assert_eq!(Key::path(["a", "b"]).to_string(), "/a/b");
    }
}
