use crate::descriptor::InvalidOptionError;

/// Every way a request can fail.
///
/// The error is `Clone` because one settled outcome is handed to every caller
/// attached to the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Request failed with status {status}")]
    HttpStatus { status: u16 },
    #[error("Failed to decode response body: {0}")]
    Decode(String),
    #[error("The operation was cancelled")]
    Cancelled,
    #[error(transparent)]
    InvalidOption(#[from] InvalidOptionError),
}

impl FetchError {
    /// Cancellation is never reported to the caller
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decode(e.to_string())
    }
}
