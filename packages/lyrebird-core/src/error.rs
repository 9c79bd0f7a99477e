//! Centralized error taxonomy for the playback engine.
//!
//! Defines how errors propagate: `UserError` and
//! `NotFoundError` are surfaced to the user verbatim by the command layer,
//! `TransientMediaError` triggers exactly one scheduler-level retry,
//! `FatalMediaError` ends the track and advances the queue, `ResourceError`
//! never blocks playback, and `InternalError` is logged and shown generically.

use thiserror::Error;

/// Coarse severity used by the command layer to decide how loudly to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// User-actionable; no logs above debug.
    UserFacing,
    /// Worth a warning: the engine recovered or will retry.
    Recoverable,
    /// Worth an error log: a track or operation failed outright.
    Failure,
    /// Invariant violated; always logged as an error.
    Internal,
}

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Preconditions the user can fix: not in a voice channel, invalid
    /// queue position, bad volume, malformed query.
    #[error("{0}")]
    User(String),

    /// Resolver returned zero tracks, or a metadata lookup came back empty.
    #[error("no results: {0}")]
    NotFound(String),

    /// Transcoder/extractor failure that a retry may fix.
    #[error("transient media error: {0}")]
    TransientMedia(String),

    /// Second attempt also failed, or the track is structurally unplayable.
    #[error("track unplayable: {0}")]
    FatalMedia(String),

    /// Cache I/O, disk full, subprocess spawn failure.
    #[error("resource error: {0}")]
    Resource(String),

    /// A deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// An invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Machine-readable error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::User(_) => "user_error",
            Self::NotFound(_) => "not_found",
            Self::TransientMedia(_) => "transient_media_error",
            Self::FatalMedia(_) => "fatal_media_error",
            Self::Resource(_) => "resource_error",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Logging/propagation severity for this error.
    pub fn severity(&self) -> Severity {
        match self {
            Self::User(_) | Self::NotFound(_) => Severity::UserFacing,
            Self::TransientMedia(_) | Self::Resource(_) => Severity::Recoverable,
            Self::FatalMedia(_) => Severity::Failure,
            Self::Timeout(_) => Severity::Recoverable,
            Self::Internal(_) => Severity::Internal,
        }
    }

    /// Treats a timeout as transient for network lookups.
    pub fn timeout_as_transient_media(context: impl Into<String>) -> Self {
        Self::TransientMedia(format!("timed out: {}", context.into()))
    }

    /// Treats a timeout as fatal for transcoder start.
    pub fn timeout_as_fatal_media(context: impl Into<String>) -> Self {
        Self::FatalMedia(format!("timed out: {}", context.into()))
    }
}

/// Convenience alias for engine-wide fallible operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from the content-addressed [`crate::cache::Cache`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("producer failed: {0}")]
    Producer(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CacheError> for EngineError {
    fn from(err: CacheError) -> Self {
        Self::Resource(err.to_string())
    }
}

/// Errors from the [`crate::encoder::Encoder`] pipeline.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("failed to start transcoder: {0}")]
    SpawnFailed(String),
    #[error("compression error: {0}")]
    Compression(String),
}

impl From<EncoderError> for EngineError {
    fn from(err: EncoderError) -> Self {
        Self::FatalMedia(err.to_string())
    }
}

/// Errors from the [`crate::resolver::Resolver`].
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("no results for query")]
    NoResults,
    #[error("extractor failed: {0}")]
    Extractor(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<ResolverError> for EngineError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::NoResults => Self::NotFound("resolver returned no tracks".into()),
            ResolverError::Timeout(d) => Self::timeout_as_transient_media(format!("{d:?}")),
            ResolverError::Extractor(msg) => Self::TransientMedia(msg),
        }
    }
}

/// Errors from the extractor subprocess contract.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to spawn extractor: {0}")]
    Spawn(String),
    #[error("extractor exited with error: {0}")]
    Process(String),
    #[error("failed to parse extractor output: {0}")]
    Parse(String),
}

impl From<ExtractorError> for ResolverError {
    fn from(err: ExtractorError) -> Self {
        ResolverError::Extractor(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_code_and_severity() {
        let err = EngineError::User("not in a voice channel".into());
        assert_eq!(err.code(), "user_error");
        assert_eq!(err.severity(), Severity::UserFacing);
    }

    #[test]
    fn fatal_media_error_is_failure_severity() {
        let err = EngineError::FatalMedia("stale url".into());
        assert_eq!(err.code(), "fatal_media_error");
        assert_eq!(err.severity(), Severity::Failure);
    }

    #[test]
    fn cache_error_maps_to_resource_error() {
        let err: EngineError = CacheError::Producer("disk full".into()).into();
        assert!(matches!(err, EngineError::Resource(_)));
    }

    #[test]
    fn resolver_no_results_maps_to_not_found() {
        let err: EngineError = ResolverError::NoResults.into();
        assert_eq!(err.code(), "not_found");
    }
}
