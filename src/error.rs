//! Error types for mapper operations

use thiserror::Error;

/// Errors raised by a storage driver.
///
/// The mapper never translates these; they reach the caller exactly as the
/// driver produced them so callers can branch on driver-specific detail.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors that can occur during mapper operations
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Entity not initialized: {0}")]
    NotInitialized(String),

    #[error("No primary key configured for table '{0}'; use a finder bulk operation instead")]
    NoPrimaryKey(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MapperError {
    pub fn source_not_found(name: impl Into<String>) -> Self {
        Self::SourceNotFound(name.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    pub fn no_primary_key(table: impl Into<String>) -> Self {
        Self::NoPrimaryKey(table.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    pub fn duplicate_key(msg: impl Into<String>) -> Self {
        Self::Driver(DriverError::DuplicateKey(msg.into()))
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Driver(DriverError::Unsupported(msg.into()))
    }

    pub fn invalid_condition(msg: impl Into<String>) -> Self {
        Self::Driver(DriverError::InvalidCondition(msg.into()))
    }

    pub fn invalid_update(msg: impl Into<String>) -> Self {
        Self::Driver(DriverError::InvalidUpdate(msg.into()))
    }

    /// Whether the error came out of a driver call rather than the mapper itself.
    pub fn is_driver_failure(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

impl From<sqlx::Error> for MapperError {
    fn from(err: sqlx::Error) -> Self {
        Self::Driver(DriverError::Sql(err))
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
