//! Error types for the outreach engine.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors. Fatal at process start only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the Registry document store.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// The store rejected a field because its physical representation
    /// differs from the one we sent (e.g. select vs. status). The caller
    /// retries once with the alternate shape.
    #[error("Field representation mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("Registry network error: {0}")]
    Network(String),

    #[error("Invalid Registry response: {0}")]
    InvalidResponse(String),

    #[error("Row {row} is missing field {field}")]
    MissingField { row: String, field: String },
}

impl RegistryError {
    /// Transient errors are retried with bounded backoff; everything else
    /// is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from the mail transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Mail API request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Mail API network error: {0}")]
    Network(String),

    #[error("Credential refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Invalid mail API response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Errors raised while processing one record or one inbound message.
/// Never aborts a cycle — the loops log and continue.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No sender credential found for {account}")]
    MissingCredential { account: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
