//! Error types for a3s-bind

use thiserror::Error;

/// Errors that can occur while resolving, binding, or evaluating policy
#[derive(Debug, Error)]
pub enum BindError {
    /// Malformed locator, empty required parameter, bad configuration value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No handler, rule, or entry exists for the requested name
    #[error("Not found: {0}")]
    NotFound(String),

    /// Locator syntax failure detected before any resource was touched
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Container, file, or archive entry does not exist
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Read attempted on a handler that never opened a data source
    #[error("Data not available: {0}")]
    DataNotAvailable(String),

    /// Handler is starved for data; resume through the continuation path
    #[error("Operation would block")]
    WouldBlock,

    /// The bind was aborted by the caller
    #[error("Bind cancelled: {0}")]
    Cancelled(String),

    /// Zone policy refused the action
    #[error("Action {action:#06x} disallowed by policy in zone {zone}")]
    PolicyDisallowed { action: u32, zone: String },

    /// Handler hit a redirect it did not follow itself
    #[error("Redirect ({status}) to '{location}' not followed")]
    RedirectFailed { status: u16, location: String },

    /// Transport-level connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote side answered with an error status
    #[error("HTTP error {status} for '{url}'")]
    Http { status: u16, url: String },

    /// Handler does not serve this locator; the caller should try its default chain
    #[error("Use default handler: {0}")]
    UseDefault(String),

    /// Action id is not one the policy engine knows about
    #[error("Unknown URL action: {0:#06x}")]
    UnknownAction(u32),

    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or override store failure
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BindError {
    /// The flat code reported to a sink for this error
    pub fn result_code(&self) -> ResultCode {
        match self {
            BindError::InvalidArgument(_) | BindError::Config(_) | BindError::Serialization(_) => {
                ResultCode::InvalidArgument
            }
            BindError::NotFound(_) | BindError::UnknownAction(_) => ResultCode::NotFound,
            BindError::InvalidUrl(_) => ResultCode::InvalidUrl,
            BindError::FileNotFound(_) => ResultCode::FileNotFound,
            BindError::DataNotAvailable(_) => ResultCode::DataNotAvailable,
            BindError::WouldBlock => ResultCode::WouldBlock,
            BindError::Cancelled(_) => ResultCode::Cancelled,
            BindError::PolicyDisallowed { .. } => ResultCode::PolicyDisallowed,
            BindError::RedirectFailed { .. } => ResultCode::RedirectFailed,
            BindError::Connection(_) => ResultCode::ConnectionFailed,
            BindError::Http { .. } => ResultCode::HttpError,
            BindError::UseDefault(_) => ResultCode::UseDefault,
            BindError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ResultCode::FileNotFound
            }
            BindError::Io(_) => ResultCode::DownloadFailure,
        }
    }

    /// Secondary error detail carried next to the result code
    ///
    /// HTTP status for `Http`, the OS error for `Io`, zero otherwise.
    pub fn error_detail(&self) -> u32 {
        match self {
            BindError::Http { status, .. } | BindError::RedirectFailed { status, .. } => {
                u32::from(*status)
            }
            BindError::Io(e) => e.raw_os_error().map(|c| c as u32).unwrap_or(0),
            BindError::PolicyDisallowed { action, .. } => *action,
            BindError::UnknownAction(action) => *action,
            _ => 0,
        }
    }

    /// Text carried next to the result code
    ///
    /// A redirect carries the absolute target so the session can rebind to it.
    pub fn result_text(&self) -> String {
        match self {
            BindError::RedirectFailed { location, .. } => location.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error means "try another handler" rather than a hard failure
    pub fn is_fallback_signal(&self) -> bool {
        matches!(self, BindError::UseDefault(_) | BindError::InvalidUrl(_))
    }
}

/// Result code delivered through `report_result`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    InvalidArgument,
    NotFound,
    InvalidUrl,
    FileNotFound,
    DataNotAvailable,
    WouldBlock,
    Cancelled,
    PolicyDisallowed,
    RedirectFailed,
    ConnectionFailed,
    HttpError,
    UseDefault,
    DownloadFailure,
}

impl ResultCode {
    /// True only for `Ok`
    pub fn is_success(self) -> bool {
        self == ResultCode::Ok
    }
}

/// Result type alias for bind operations
pub type Result<T> = std::result::Result<T, BindError>;
