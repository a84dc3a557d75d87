// ── Runtime configuration ──
//
// These types describe how to reach the API and how to coalesce requests.
// They never touch disk: gather-config (or a test) builds them and hands
// them in.

use std::time::Duration;

use gather_api::{TlsMode, TransportConfig};
use url::Url;

/// Upper bound the bulk endpoints accept per call.
pub const MAX_BATCH_SIZE: usize = 50;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (local development servers).
    DangerAcceptInvalid,
}

/// How to reach the catalog API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root (e.g., `https://catalog.example/api/`).
    pub base_url: Url,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout, enforced by the transport.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
        }
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
        }
    }
}

/// When an open coalescing window is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush automatically once `delay` has elapsed after the first request
    /// of a window. A zero delay flushes on the next scheduler turn.
    Auto { delay: Duration },
    /// Only an explicit `flush()` dispatches the window.
    Manual,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::Auto {
            delay: Duration::ZERO,
        }
    }
}

/// Coalescing behaviour of a `KeyBatcher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Keys per bulk call; clamped to `1..=MAX_BATCH_SIZE`.
    pub max_batch_size: usize,
    pub flush: FlushPolicy,
}

impl BatcherConfig {
    pub fn manual() -> Self {
        Self {
            flush: FlushPolicy::Manual,
            ..Self::default()
        }
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Chunk size actually used for dispatch.
    pub fn chunk_size(&self) -> usize {
        self.max_batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            flush: FlushPolicy::default(),
        }
    }
}

/// Everything a `Catalog` needs.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub client: ClientConfig,
    pub batcher: BatcherConfig,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_clamped() {
        assert_eq!(BatcherConfig::default().chunk_size(), 50);
        assert_eq!(BatcherConfig::default().with_max_batch_size(500).chunk_size(), 50);
        assert_eq!(BatcherConfig::default().with_max_batch_size(0).chunk_size(), 1);
        assert_eq!(BatcherConfig::default().with_max_batch_size(10).chunk_size(), 10);
    }

    #[test]
    fn transport_mirrors_tls_choice() {
        let mut config = ClientConfig::new("https://catalog.example/".parse().unwrap());
        config.tls = TlsVerification::DangerAcceptInvalid;
        assert_eq!(config.transport().tls, TlsMode::DangerAcceptInvalid);
    }
}
