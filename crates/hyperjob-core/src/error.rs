use thiserror::Error;

#[derive(Debug, Error)]
pub enum HyperjobError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl HyperjobError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            HyperjobError::Config(_) => "CONFIG_ERROR",
            HyperjobError::InvalidValue { .. } => "INVALID_VALUE",
        }
    }
}

pub type Result<T> = std::result::Result<T, HyperjobError>;
