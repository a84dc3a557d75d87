// gather-api: Async HTTP client for single-item and bulk retrieval endpoints

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, Bulk};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
