//! Configuration for the gather tools.
//!
//! A TOML file from the platform config directory, overridden by
//! `GATHER_`-prefixed environment variables, translated into the runtime
//! types of `gather_core` (`ClientConfig`, `BatcherConfig`, `MemoOptions`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gather_core::{
    BatcherConfig, CatalogConfig, ClientConfig, FlushPolicy, KeyEquality, MAX_BATCH_SIZE,
    MemoOptions, TlsVerification,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub cache: CacheSettings,
}

/// `[api]`: where the catalog API lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiSettings {
    /// API root (e.g., "https://catalog.example/api/").
    pub base_url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Skip TLS verification.
    #[serde(default)]
    pub insecure: bool,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: default_timeout(),
            insecure: false,
            ca_cert: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// `[batch]`: request coalescing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchSettings {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Delay between the first request of a window and its flush.
    #[serde(default)]
    pub window_ms: u64,

    /// Only flush on explicit request.
    #[serde(default)]
    pub manual_flush: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            window_ms: 0,
            manual_flush: false,
        }
    }
}

fn default_max_batch_size() -> usize {
    MAX_BATCH_SIZE
}

/// `[cache]`: memoized calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSettings {
    pub max_entries: Option<usize>,

    pub ttl_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub single_flight: bool,

    /// Compare arguments structurally instead of with their own `Eq`.
    #[serde(default)]
    pub deep_equality: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: None,
            ttl_secs: None,
            single_flight: true,
            deep_equality: false,
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "gather", "gather").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("gather");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the Config from `path` (or the default location) plus environment.
///
/// A missing file is not an error; defaults and environment still apply.
/// Nested keys use a double underscore: `GATHER_API__BASE_URL`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("GATHER_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

impl Config {
    /// Render as TOML, as written in a config file.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    // ── Translation to runtime config ───────────────────────────────

    /// Build a `ClientConfig`. `base_url_override` takes precedence over
    /// the file and environment.
    pub fn client_config(&self, base_url_override: Option<&str>) -> Result<ClientConfig, ConfigError> {
        let raw = base_url_override
            .or(self.api.base_url.as_deref())
            .ok_or_else(|| invalid("api.base_url", "not set (use --base-url or GATHER_API__BASE_URL)"))?;
        let base_url: url::Url = raw
            .parse()
            .map_err(|_| invalid("api.base_url", format!("invalid URL: {raw}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid(
                "api.base_url",
                format!("expected http or https, got '{}'", base_url.scheme()),
            ));
        }
        if self.api.timeout == 0 {
            return Err(invalid("api.timeout", "must be at least 1 second"));
        }

        let tls = if self.api.insecure {
            TlsVerification::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.api.ca_cert {
            TlsVerification::CustomCa(ca_path.clone())
        } else {
            TlsVerification::SystemDefaults
        };

        Ok(ClientConfig {
            base_url,
            tls,
            timeout: Duration::from_secs(self.api.timeout),
        })
    }

    pub fn batcher_config(&self) -> Result<BatcherConfig, ConfigError> {
        let size = self.batch.max_batch_size;
        if !(1..=MAX_BATCH_SIZE).contains(&size) {
            return Err(invalid(
                "batch.max_batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}, got {size}"),
            ));
        }

        let flush = if self.batch.manual_flush {
            FlushPolicy::Manual
        } else {
            FlushPolicy::Auto {
                delay: Duration::from_millis(self.batch.window_ms),
            }
        };
        Ok(BatcherConfig {
            max_batch_size: size,
            flush,
        })
    }

    pub fn memo_options(&self) -> Result<MemoOptions, ConfigError> {
        if self.cache.max_entries == Some(0) {
            return Err(invalid("cache.max_entries", "must be at least 1"));
        }
        if self.cache.ttl_secs == Some(0) {
            return Err(invalid("cache.ttl_secs", "must be at least 1 second"));
        }

        Ok(MemoOptions {
            max_entries: self.cache.max_entries,
            ttl: self.cache.ttl_secs.map(Duration::from_secs),
            key_equality: if self.cache.deep_equality {
                KeyEquality::Deep
            } else {
                KeyEquality::Shallow
            },
            single_flight: self.cache.single_flight,
        })
    }

    pub fn catalog_config(&self, base_url_override: Option<&str>) -> Result<CatalogConfig, ConfigError> {
        Ok(CatalogConfig {
            client: self.client_config(base_url_override)?,
            batcher: self.batcher_config()?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    // Loading reads process environment, so these run inside a Jail.

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_| {
            let dir = tempfile::tempdir().unwrap();
            let config = load_config(Some(&dir.path().join("missing.toml"))).unwrap();
            assert_eq!(config.batch.max_batch_size, 50);
            assert!(config.cache.single_flight);
            assert!(config.api.base_url.is_none());
            Ok(())
        });
    }

    #[test]
    fn reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[api]
base_url = "https://catalog.example/api/"
timeout = 5

[batch]
max_batch_size = 20
window_ms = 10

[cache]
ttl_secs = 30
deep_equality = true
"#
        )
        .unwrap();

        let mut loaded = None;
        Jail::expect_with(|_| {
            loaded = Some(load_config(Some(file.path())).unwrap());
            Ok(())
        });
        let config = loaded.unwrap();
        let client = config.client_config(None).unwrap();
        assert_eq!(client.base_url.as_str(), "https://catalog.example/api/");
        assert_eq!(client.timeout, Duration::from_secs(5));

        let batcher = config.batcher_config().unwrap();
        assert_eq!(batcher.max_batch_size, 20);
        assert_eq!(
            batcher.flush,
            FlushPolicy::Auto {
                delay: Duration::from_millis(10)
            }
        );

        let memo = config.memo_options().unwrap();
        assert_eq!(memo.ttl, Some(Duration::from_secs(30)));
        assert_eq!(memo.key_equality, KeyEquality::Deep);
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "[api]\nbase_url = \"https://file.example/\"\n",
            )?;
            jail.set_env("GATHER_API__BASE_URL", "https://env.example/");
            jail.set_env("GATHER_BATCH__MANUAL_FLUSH", "true");

            let config = load_config(Some(Path::new("config.toml"))).unwrap();
            assert_eq!(config.api.base_url.as_deref(), Some("https://env.example/"));
            assert_eq!(config.batcher_config().unwrap().flush, FlushPolicy::Manual);
            Ok(())
        });
    }

    #[test]
    fn flag_overrides_base_url() {
        let mut config = Config::default();
        config.api.base_url = Some("https://file.example/".into());
        let client = config.client_config(Some("http://localhost:8080/")).unwrap();
        assert_eq!(client.base_url.as_str(), "http://localhost:8080/");
    }

    #[test]
    fn missing_base_url_is_a_validation_error() {
        let err = Config::default().client_config(None).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "api.base_url"));
    }

    #[test]
    fn batch_size_over_limit_is_rejected() {
        let mut config = Config::default();
        config.batch.max_batch_size = 51;
        let err = config.batcher_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "batch.max_batch_size"));
    }

    #[test]
    fn insecure_wins_over_ca_cert() {
        let mut config = Config::default();
        config.api.base_url = Some("https://catalog.example/".into());
        config.api.insecure = true;
        config.api.ca_cert = Some("/etc/ca.pem".into());
        assert_eq!(
            config.client_config(None).unwrap().tls,
            TlsVerification::DangerAcceptInvalid
        );
    }

    #[test]
    fn renders_as_toml() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[batch]"));
        assert!(rendered.contains("max_batch_size = 50"));
    }
}
