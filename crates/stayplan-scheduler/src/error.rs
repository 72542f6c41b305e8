use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The recurrence definition is malformed or cannot produce a next run.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No schedule with the given ID exists in the store.
    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    /// Neither the referenced collection nor the referenced search resolved.
    #[error("No collection or search found for schedule {schedule_id}")]
    PayloadMissing { schedule_id: String },

    /// The job sink rejected the submission.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The job sink did not answer within the configured budget.
    #[error("Submission timed out after {ms}ms")]
    SubmissionTimeout { ms: u64 },

    /// A stored JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Short error code string sent to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "PERSISTENCE_ERROR",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::ScheduleNotFound { .. } => "NOT_FOUND",
            SchedulerError::PayloadMissing { .. } => "PAYLOAD_MISSING",
            SchedulerError::Submission(_) | SchedulerError::SubmissionTimeout { .. } => {
                "SUBMISSION_FAILURE"
            }
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
