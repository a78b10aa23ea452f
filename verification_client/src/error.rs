use thiserror::Error;

/// Everything that can go wrong while preparing, submitting or observing a
/// verification job.
///
/// Variants carry rendered text rather than source errors so that observers
/// can hand the same error out to every subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// Bad or incomplete local input. Never reaches the network.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend answered with a non-success status.
    #[error("Backend rejected the request ({status}): {reason}")]
    BackendRejected { status: u16, reason: String },

    /// The job ran but reported failure.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// The job finished but its trailing result payload was unreadable.
    #[error("Could not parse results: {0}")]
    ResultParse(String),

    /// A status query failed while the job was running.
    #[error("Status check failed: {0}")]
    StatusCheck(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(String),
}

impl VerifyError {
    /// Whether a fresh attempt has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, VerifyError::Connection(_))
    }
}

impl From<reqwest::Error> for VerifyError {
    fn from(err: reqwest::Error) -> Self {
        VerifyError::Connection(err.to_string())
    }
}

impl From<csv::Error> for VerifyError {
    fn from(err: csv::Error) -> Self {
        VerifyError::Csv(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
