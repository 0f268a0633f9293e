//! Unified error types for the shortlist engine
//!
//! Every failure in the prediction pipeline is a typed variant here; no
//! component swallows an error to produce a default score. The only silent
//! fallback in the system is resume parsing, which degrades to empty
//! defaults inside the parser bridge rather than through this type.

use std::fmt;

/// Main error type for the engine
///
/// Implements `std::error::Error` and maps onto HTTP status codes via
/// [`ShortlistError::http_status`].
#[derive(Debug, Clone)]
pub enum ShortlistError {
    /// No users row for the requested id
    UserNotFound(String),
    /// No jobs row for the requested id
    JobNotFound(String),
    /// Canonical JD text resolved to an empty string
    JdEmpty(String),
    /// Feature vector carries no signal at all (no skills, no experience, no projects)
    CandidateIncomplete(String),
    /// Classifier artifact missing or the inference worker could not be started
    ModelUnavailable(String),
    /// The classifier returned a value that contradicts the feature vector
    /// (zero/NaN strength for a non-empty profile, shape mismatch, protocol violation)
    ClassifierInvariantFailed(String),
    /// A freshly computed per-job embedding collided with a recent embedding
    /// for a different job id
    DuplicateEmbeddingDetected {
        current_job_id: String,
        colliding_job_id: String,
    },
    /// A just-computed job-match score is identical (to six decimals) to a
    /// recent score for a different job id
    StateLeakageDetected {
        current_job_id: String,
        colliding_job_id: String,
    },
    /// A bounded wait expired (subprocess call, queue admission)
    Timeout { operation: String, limit_ms: u64 },
    /// Storage-layer failure
    Storage(StorageError),
    /// Malformed request input
    Validation(String),
}

/// Storage-specific errors
#[derive(Debug, Clone)]
pub enum StorageError {
    ConnectionFailed(String),
    QueryFailed(String),
    MigrationFailed(String),
    InvalidData(String),
}

impl fmt::Display for ShortlistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShortlistError::UserNotFound(id) => write!(f, "User not found: {}", id),
            ShortlistError::JobNotFound(id) => write!(f, "Job not found: {}", id),
            ShortlistError::JdEmpty(id) => {
                write!(f, "Job {} has no description text to analyze", id)
            }
            ShortlistError::CandidateIncomplete(id) => write!(
                f,
                "Candidate profile for user {} has no skills, experience, or projects",
                id
            ),
            ShortlistError::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            ShortlistError::ClassifierInvariantFailed(msg) => {
                write!(f, "Classifier invariant failed: {}", msg)
            }
            ShortlistError::DuplicateEmbeddingDetected {
                current_job_id,
                colliding_job_id,
            } => write!(
                f,
                "Duplicate embedding detected: job {} produced an embedding identical to job {}",
                current_job_id, colliding_job_id
            ),
            ShortlistError::StateLeakageDetected {
                current_job_id,
                colliding_job_id,
            } => write!(
                f,
                "State leakage detected: job {} produced the same match score as job {}",
                current_job_id, colliding_job_id
            ),
            ShortlistError::Timeout { operation, limit_ms } => {
                write!(f, "Timed out after {}ms: {}", limit_ms, operation)
            }
            ShortlistError::Storage(e) => write!(f, "Storage error: {}", e),
            ShortlistError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => {
                write!(f, "Database connection failed: {}", msg)
            }
            StorageError::QueryFailed(msg) => write!(f, "Query failed: {}", msg),
            StorageError::MigrationFailed(msg) => write!(f, "Migration failed: {}", msg),
            StorageError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl std::error::Error for ShortlistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShortlistError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for ShortlistError {
    fn from(err: StorageError) -> Self {
        ShortlistError::Storage(err)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let error_msg = msg.unwrap_or_else(|| format!("SQLite error code: {:?}", e.code));
                StorageError::QueryFailed(error_msg)
            }
            rusqlite::Error::QueryReturnedNoRows => {
                StorageError::QueryFailed("Query returned no rows".to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ShortlistError {
    fn from(err: rusqlite::Error) -> Self {
        ShortlistError::Storage(err.into())
    }
}

impl ShortlistError {
    /// Stable machine-readable code carried in error responses
    pub fn code(&self) -> &'static str {
        match self {
            ShortlistError::UserNotFound(_) => "USER_NOT_FOUND",
            ShortlistError::JobNotFound(_) => "JOB_NOT_FOUND",
            ShortlistError::JdEmpty(_) => "JD_EMPTY",
            ShortlistError::CandidateIncomplete(_) => "CANDIDATE_INCOMPLETE",
            ShortlistError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            ShortlistError::ClassifierInvariantFailed(_) => "CLASSIFIER_INVARIANT_FAILED",
            ShortlistError::DuplicateEmbeddingDetected { .. } => "DUPLICATE_EMBEDDING_DETECTED",
            ShortlistError::StateLeakageDetected { .. } => "STATE_LEAKAGE_DETECTED",
            ShortlistError::Timeout { .. } => "TIMEOUT",
            ShortlistError::Storage(_) => "SERVICE_UNAVAILABLE",
            ShortlistError::Validation(_) => "INVALID_REQUEST",
        }
    }

    /// HTTP status the error maps to at the API boundary
    pub fn http_status(&self) -> u16 {
        match self {
            ShortlistError::UserNotFound(_) | ShortlistError::JobNotFound(_) => 404,
            ShortlistError::JdEmpty(_) | ShortlistError::CandidateIncomplete(_) => 422,
            ShortlistError::ModelUnavailable(_) => 503,
            ShortlistError::ClassifierInvariantFailed(_)
            | ShortlistError::DuplicateEmbeddingDetected { .. }
            | ShortlistError::StateLeakageDetected { .. } => 500,
            ShortlistError::Timeout { .. } => 504,
            ShortlistError::Storage(_) => 503,
            ShortlistError::Validation(_) => 400,
        }
    }

    /// Message safe to return to API clients
    ///
    /// Storage details never leave the process; everything else is already
    /// phrased for the caller.
    pub fn user_message(&self) -> String {
        match self {
            ShortlistError::Storage(_) => "Service unavailable".to_string(),
            other => other.to_string(),
        }
    }

    /// Log the error with context and return it (for use in error chains)
    pub fn log_and_return(self, context: &str) -> Self {
        crate::logging::log_engine_error(context, &self);
        self
    }
}
