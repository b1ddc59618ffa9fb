use thiserror::Error;

/// Error taxonomy shared by every subsystem in the trading core.
///
/// Recovery policy per variant:
/// - `ConfigurationMissing` is fatal at startup for the component that needs it.
/// - `ExternalUnavailable` / `ParseError` / `InsufficientFunds` / `BrokerReject` are
///   retryable by the caller (at most once, with corrective feedback where applicable).
/// - `ValidationError` / `GateBlocked` / `InvariantViolation` are never retried.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("failed to parse response: {0}")]
    ParseError(String),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("blocked by gate: {0}")]
    GateBlocked(String),

    #[error("broker rejected order: {0}")]
    BrokerReject(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl CoreError {
    /// Whether a caller following the documented policy should retry once
    /// with corrective feedback rather than abandoning the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ExternalUnavailable(_)
                | CoreError::ParseError(_)
                | CoreError::InsufficientFunds(_)
                | CoreError::BrokerReject(_)
        )
    }
}
