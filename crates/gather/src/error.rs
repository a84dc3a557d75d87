//! CLI error types with miette diagnostics.
//!
//! Maps config and fetch failures into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use gather_config::ConfigError;
use gather_core::FetchError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(gather::validation),
        help("Set it in the config file, via GATHER_* environment variables, or with a flag.")
    )]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(gather::config))]
    Config(ConfigError),

    // ── Fetching ─────────────────────────────────────────────────────

    #[error("Could not set up a client for {url}")]
    #[diagnostic(
        code(gather::client),
        help("Check the base URL and TLS settings (use --insecure (-k) for self-signed servers).")
    )]
    Client {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("{count} of {total} {resource} not found")]
    #[diagnostic(code(gather::not_found))]
    NotFound {
        resource: String,
        count: usize,
        total: usize,
    },

    #[error("{count} of {total} {resource} could not be retrieved")]
    #[diagnostic(
        code(gather::fetch_failed),
        help("Run with -vv to see request logs.")
    )]
    FetchFailed {
        resource: String,
        count: usize,
        total: usize,
    },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(gather::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => exit_code::USAGE,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Client { .. } | Self::FetchFailed { .. } => exit_code::CONNECTION,
            Self::Config(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
