use thiserror::Error;

/// The error taxonomy from the design's error handling section.
///
/// Every fallible boundary in this crate (registry load, HTTP clients,
/// snapshot/ledger writes, resolution) raises one of these. The dynamic
/// engine (`engine::DynamicEngine::run`) catches everything except
/// `ConfigError` per (station, event_day) step and continues; `ConfigError`
/// is fatal at startup.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Station registry load, env var parse. Fatal at startup.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Transient network failure, still eligible for retry. Internal to the
    /// HTTP clients — never escapes a retry loop as this variant; it's
    /// always resolved into `ProviderError` or a successful retry.
    #[error("transient network error: {0}")]
    NetworkTransient(String),

    /// HTTP 5xx after retries exhausted, or malformed provider JSON.
    #[error("provider error ({source}): {message}")]
    ProviderError { source: &'static str, message: String },

    /// Expected absence: no event for a (city, day), no registry entry, etc.
    #[error("not found: {0}")]
    NotFound(String),

    /// A bracket has no usable market price right now.
    #[error("no price available: {0}")]
    NoPrice(String),

    /// A naive (non-timezone-aware) instant was passed where an offset was required.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Snapshot or ledger write failed.
    #[error("io error: {0}")]
    Io(String),

    /// `outcome_prices` was called on a still-open event.
    #[error("event unresolved: {0}")]
    Unresolved(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
