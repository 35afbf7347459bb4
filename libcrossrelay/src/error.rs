//! Error types for Crossrelay

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cursor store error: {0}")]
    Cursor(#[from] CursorError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Media staging error: {0}")]
    Stage(#[from] StageError),
}

impl RelayError {
    /// Returns the process exit code for errors that abort the binary before a run
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Platform(PlatformError::Authentication(_)) => 2,
            RelayError::Config(_) => 1,
            RelayError::Cursor(_) => 1,
            RelayError::Platform(_) => 1,
            RelayError::Stage(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CursorError {
    #[error("Failed to read cursor file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to parse cursor file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write cursor file: {0}")]
    Write(#[source] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Fetching failed: {0}")]
    Fetch(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Unexpected response: {0}")]
    Parse(String),
}

impl PlatformError {
    /// Map a non-success HTTP status to the matching error variant
    ///
    /// `fallback` builds the variant used for statuses that are neither
    /// authentication nor rate-limit failures.
    pub fn from_status(
        status: u16,
        context: &str,
        fallback: fn(String) -> PlatformError,
    ) -> Self {
        let message = format!("{} (HTTP {})", context, status);
        match status {
            401 | 403 => PlatformError::Authentication(message),
            429 => PlatformError::RateLimit(message),
            _ => fallback(message),
        }
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Download request failed for {url}: {reason}")]
    Request { url: String, reason: String },

    #[error("Download of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to write staged file: {0}")]
    Io(#[from] std::io::Error),
}
