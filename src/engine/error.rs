use crate::config::ConfigError;
use crate::model::{ReservationId, ResourceId};

#[derive(Debug)]
pub enum EngineError {
    Configuration(ConfigError),
    /// The candidate interval overlaps this confirmed reservation.
    Conflict(ReservationId),
    /// Absent, already cancelled, or owned by another requester.
    NotFound(ReservationId),
    UnknownResource(ResourceId),
    InvalidSpan,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Configuration(e) => write!(f, "configuration error: {e}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::UnknownResource(id) => write!(f, "unknown resource: {id}"),
            EngineError::InvalidSpan => write!(f, "start time must be before end time"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Configuration(e)
    }
}
