use thiserror::Error;

/// Error taxonomy shared by every layer.
///
/// The indexing pipeline cares about two axes: whether a failure is worth
/// retrying (`Transient`) and whether the offending unit of work should be
/// skipped while everything else continues (`PermanentInput`). Corruption of
/// a persisted store is its own class so callers can trigger a rebuild
/// instead of failing outright.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Network timeout, throttling, unreachable provider. Retried with
    /// backoff; exhausting retries degrades the operation, never the process.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// Malformed, oversized or otherwise unprocessable input. The offending
    /// file is marked failed/skipped; processing continues elsewhere.
    #[error("Permanent input error: {0}")]
    PermanentInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted store failed its integrity check on load.
    #[error("Corrupt store: {0}")]
    Corruption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent_input(msg: impl Into<String>) -> Self {
        Self::PermanentInput(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_permanent_input(&self) -> bool {
        matches!(self, Self::PermanentInput(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = DomainError::transient("timeout after 10s");
        assert!(err.is_transient());
        assert!(!err.is_permanent_input());
    }

    #[test]
    fn test_corruption_classification() {
        let err = DomainError::corruption("bad snapshot header");
        assert!(err.is_corruption());
        assert!(!err.is_transient());
    }
}
