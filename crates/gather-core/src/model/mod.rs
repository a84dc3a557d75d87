// ── Domain model ──
//
// Keys name requested entities. Entities themselves are opaque JSON
// documents; their business meaning belongs to the caller.

mod key;

pub use key::{Key, KeyKind};

/// An entity as returned by the retrieval endpoints.
pub type Entity = serde_json::Value;
