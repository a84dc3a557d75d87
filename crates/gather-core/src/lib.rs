//! Data-fetching primitives between `gather-api` and its consumers.
//!
//! The crate provides three independent layers, plus a facade that wires the
//! first one to the catalog API:
//!
//! - **[`KeyBatcher`]**: collects keys requested during one scheduler turn,
//!   deduplicates them, and resolves them with a single-item call (one key)
//!   or bulk calls of at most [`MAX_BATCH_SIZE`] keys. Failures are isolated
//!   per key: a missing entity or a failed chunk never poisons its siblings.
//!
//! - **[`Memoized`]**: wraps an async function with an argument-keyed cache
//!   (TTL, size bound, shallow or deep key equality). Concurrent calls with
//!   equal arguments share one in-flight call, and failures are never cached.
//!
//! - **[`Resource`]**: the reactive view of an async source. Tracks
//!   status, last value and last error, and applies overlapping fetches in
//!   `TakeLast` or `TakeEvery` order using a generation counter.
//!   Subscribers receive synchronous callbacks or a [`StateStream`].
//!
//! - **[`Catalog`]**: owns the HTTP client and one `KeyBatcher<HttpSource>`
//!   per resource and key kind.

pub mod batcher;
pub mod catalog;
pub mod config;
pub mod error;
pub mod memo;
pub mod model;
pub mod resource;

// ── Primary re-exports ──────────────────────────────────────────────
pub use batcher::{BatchSource, HttpSource, Invalidate, KeyBatcher, KeyResult, Pending};
pub use catalog::Catalog;
pub use config::{
    BatcherConfig, CatalogConfig, ClientConfig, FlushPolicy, MAX_BATCH_SIZE, TlsVerification,
};
pub use error::FetchError;
pub use memo::{KeyEquality, MemoOptions, Memoized, memoize};
pub use model::{Entity, Key, KeyKind};
pub use resource::{
    FetchMode, FetchOutcome, Resource, ResourceOptions, ResourceState, ResourceStatus,
    StateStream, StateWatchStream, Subscription,
};
