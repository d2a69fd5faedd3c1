use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaidsyncError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RaidsyncError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            RaidsyncError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RaidsyncError>;
