use thiserror::Error;

#[derive(Debug, Error)]
pub enum PpeError {
    /// Model output that could not be turned into JSON at all.
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    /// Network, storage or database call failed.
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("Gateway error {status}: {message}")]
    Gateway { status: u16, message: String },

    /// Rejected before any network call (not an image, too large).
    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Local store error: {0}")]
    LocalStore(String),

    #[error("Capture not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PpeError {
    /// Notification text shown to the operator for this failure category.
    pub fn user_message(&self) -> String {
        match self {
            PpeError::MalformedResponse(_) => {
                "The vision model returned a response that could not be read.".to_string()
            }
            PpeError::Transport(_) => {
                "Network or storage unavailable; capture kept locally.".to_string()
            }
            PpeError::RateLimited(_) => {
                "Rate limit exceeded, please try again later.".to_string()
            }
            PpeError::QuotaExceeded(_) => {
                "Vision API quota exhausted, please add credits to the workspace.".to_string()
            }
            PpeError::Gateway { status, .. } => {
                format!("Vision gateway error (HTTP {}).", status)
            }
            PpeError::Validation(msg) => format!("Invalid file: {}", msg),
            PpeError::Config(msg) => format!("Configuration problem: {}", msg),
            PpeError::Credentials(msg) => msg.clone(),
            PpeError::LocalStore(msg) => format!("Local store problem: {}", msg),
            PpeError::NotFound(id) => format!("No capture with id {}.", id),
            PpeError::Io(e) => format!("File system error: {}", e),
        }
    }
}

impl From<rusqlite::Error> for PpeError {
    fn from(err: rusqlite::Error) -> Self {
        PpeError::LocalStore(err.to_string())
    }
}

impl From<PpeError> for String {
    fn from(err: PpeError) -> Self {
        err.to_string()
    }
}
