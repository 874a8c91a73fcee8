use std::path::PathBuf;
use thiserror::Error;

/// Stable error codes, one per [`Error`] variant.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const DUPLICATE_PACKAGE: &str = "DUPLICATE_PACKAGE";
    pub const PREREQUISITE_MISSING: &str = "PREREQUISITE_MISSING";
    pub const PREEXISTING_CACHE_CONFLICT: &str = "PREEXISTING_CACHE_CONFLICT";
    pub const PROXY_PROVISIONING_ERROR: &str = "PROXY_PROVISIONING_ERROR";
    pub const RESOLUTION_ERROR: &str = "RESOLUTION_ERROR";
    pub const CONTENT_FETCH_ERROR: &str = "CONTENT_FETCH_ERROR";
    pub const REQUEST_NOT_FOUND: &str = "REQUEST_NOT_FOUND";
    pub const INVALID_TRANSITION: &str = "INVALID_TRANSITION";
    pub const REQUEST_BUSY: &str = "REQUEST_BUSY";
    pub const STORE_ERROR: &str = "STORE_ERROR";
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Core error type for depbundle operations.
///
/// The `Display` output of every variant is the human-readable reason that
/// ends up in a failed request's `state_reason`.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request input, rejected before any stage runs.
    #[error("{0}")]
    Validation(String),

    #[error("Duplicate package: {name} ({kind}) {version} at {path}")]
    DuplicatePackage {
        name: String,
        kind: String,
        version: String,
        path: String,
    },

    /// An ecosystem artifact (usually a lock file) is absent.
    #[error("{0}")]
    PrerequisiteMissing(String),

    /// The source tree ships its own dependency cache.
    #[error("{0}")]
    PreexistingCacheConflict(String),

    #[error("{0}")]
    ProxyProvisioning(String),

    /// The ecosystem resolver failed. Opaque to the engine.
    #[error("{0}")]
    Resolution(String),

    #[error("{0}")]
    ContentFetch(String),

    #[error("Request {0} does not exist")]
    RequestNotFound(u64),

    #[error("Request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: u64,
        from: &'static str,
        to: &'static str,
    },

    /// A pipeline for the request is already running.
    #[error("Request {0} is already being processed")]
    RequestBusy(u64),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    #[must_use]
    pub fn proxy(msg: impl Into<String>) -> Self {
        Self::ProxyProvisioning(msg.into())
    }

    #[must_use]
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => codes::VALIDATION_ERROR,
            Self::DuplicatePackage { .. } => codes::DUPLICATE_PACKAGE,
            Self::PrerequisiteMissing(_) => codes::PREREQUISITE_MISSING,
            Self::PreexistingCacheConflict(_) => codes::PREEXISTING_CACHE_CONFLICT,
            Self::ProxyProvisioning(_) => codes::PROXY_PROVISIONING_ERROR,
            Self::Resolution(_) => codes::RESOLUTION_ERROR,
            Self::ContentFetch(_) => codes::CONTENT_FETCH_ERROR,
            Self::RequestNotFound(_) => codes::REQUEST_NOT_FOUND,
            Self::InvalidTransition { .. } => codes::INVALID_TRANSITION,
            Self::RequestBusy(_) => codes::REQUEST_BUSY,
            Self::Store(_) => codes::STORE_ERROR,
            Self::ConfigRead { .. } | Self::ConfigParse { .. } => codes::CONFIG_ERROR,
            Self::Io(_) => codes::IO_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::proxy(format!("Request to the proxy timed out: {e}"))
        } else if e.is_connect() {
            Self::proxy(format!("Connection to the proxy failed: {e}"))
        } else {
            Self::proxy(e.to_string())
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
