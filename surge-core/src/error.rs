pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced while building or preparing a scenario.
///
/// Step and iteration failures are never errors: they become outcomes plus a
/// metrics emission and the virtual user carries on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("ramp step {index}: `usersPerBatch` must be a positive integer for `{action}`")]
    InvalidBatch { index: usize, action: String },

    #[error("`pacingDelta` must be within [0, 1] (got {0})")]
    InvalidJitter(f64),

    #[error("script `{0}` has no steps")]
    EmptyScript(String),

    #[error("variable `{name}`: invalid generation pattern: {source}")]
    GenerationPattern {
        name: String,
        #[source]
        source: Box<crate::generator::PatternError>,
    },

    #[error("variable `{name}`: invalid insertion pattern: {source}")]
    InsertionPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern `{pattern}` must have exactly one capture group (found {found})")]
    CaptureGroups { pattern: String, found: usize },

    #[error("invalid correlation pattern: {0}")]
    CorrelationPattern(#[from] regex::Error),

    #[error("step `{step}`: {source}")]
    InvalidMethod {
        step: String,
        #[source]
        source: surge_http::Error,
    },

    #[error("async scenario `{0}` has no messaging transport")]
    MissingTransport(String),

    #[error("scenario `{0}` must be prepared before it runs")]
    NotPrepared(String),

    #[error("scenario `{0}` is already running")]
    AlreadyRunning(String),
}
