/// Shared error type used across all Parley crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("tool denied: {0}")]
    ToolDenied(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("model (retryable): {message}")]
    ModelRetryable {
        message: String,
        /// Server-supplied retry hint, when present.
        retry_after_ms: Option<u64>,
    },

    #[error("model context overflow: {0}")]
    ModelContext(String),

    #[error("model auth: {0}")]
    ModelAuth(String),

    #[error("model bad request: {0}")]
    ModelBadRequest(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification consulted by the retry/failover policy (and nothing else —
/// handlers match on [`Error`] variants directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: back off and retry, then fail over.
    Retryable,
    /// Credentials problem: never retry, never fail over.
    Auth,
    /// Context window exceeded: compact and retry.
    Context,
    /// Request the model rejected as malformed: never retry, never fail over.
    BadRequest,
    /// Persistent unexpected failure: fail over without retrying.
    Fatal,
}

impl Error {
    /// Map this error onto the model-call policy classes.
    ///
    /// Non-model errors (tool, persistence, validation) classify as `Fatal`
    /// so that an accidental routing through the failover path surfaces
    /// instead of looping.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::ModelRetryable { .. } | Error::Timeout(_) => ErrorClass::Retryable,
            Error::ModelAuth(_) => ErrorClass::Auth,
            Error::ModelContext(_) => ErrorClass::Context,
            Error::ModelBadRequest(_) => ErrorClass::BadRequest,
            Error::Io(_) => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }

    /// Whether the failover chain may move on to another model after this
    /// error. Auth and schema errors would fail identically everywhere.
    pub fn failover_eligible(&self) -> bool {
        matches!(self.class(), ErrorClass::Retryable | ErrorClass::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classifies_retryable() {
        let e = Error::ModelRetryable {
            message: "HTTP 529".into(),
            retry_after_ms: Some(500),
        };
        assert_eq!(e.class(), ErrorClass::Retryable);
        assert!(e.failover_eligible());
    }

    #[test]
    fn auth_never_fails_over() {
        let e = Error::ModelAuth("HTTP 401".into());
        assert_eq!(e.class(), ErrorClass::Auth);
        assert!(!e.failover_eligible());
    }

    #[test]
    fn bad_request_never_fails_over() {
        let e = Error::ModelBadRequest("unknown field".into());
        assert!(!e.failover_eligible());
    }

    #[test]
    fn context_overflow_class() {
        let e = Error::ModelContext("context length exceeded".into());
        assert_eq!(e.class(), ErrorClass::Context);
    }

    #[test]
    fn timeouts_are_retryable() {
        assert_eq!(Error::Timeout("read".into()).class(), ErrorClass::Retryable);
    }
}
