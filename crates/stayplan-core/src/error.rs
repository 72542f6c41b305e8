use thiserror::Error;

/// Errors raised while assembling shared configuration.
#[derive(Debug, Error)]
pub enum StayplanError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StayplanError {
    /// Short error code string attached to log events.
    pub fn code(&self) -> &'static str {
        match self {
            StayplanError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, StayplanError>;
