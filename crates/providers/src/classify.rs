//! Failure classification for the model call path.
//!
//! Every failure becomes exactly one [`Error`] variant whose
//! [`ErrorClass`](pl_domain::ErrorClass) drives the retry/failover policy:
//! 408/429/5xx and I/O problems retry, 401/403 surface immediately,
//! context-window overflows trigger compaction, schema-rejected requests
//! surface, everything else is fatal.

use pl_domain::error::Error;

/// Markers providers use to report an overflowing prompt. Checked
/// case-insensitively against 400-class bodies.
const CONTEXT_MARKERS: &[&str] = &[
    "context length",
    "context_length_exceeded",
    "maximum context",
    "too many tokens",
    "prompt is too long",
];

/// Classify an HTTP failure from a model endpoint.
pub fn classify_http(status: u16, body: &str, retry_after_ms: Option<u64>) -> Error {
    let lower = body.to_lowercase();

    match status {
        401 | 403 => {
            // A rate-limit hint on a 403 means throttling, not bad
            // credentials.
            if retry_after_ms.is_some() || lower.contains("rate limit") {
                Error::ModelRetryable {
                    message: format!("HTTP {status}: {}", snippet(body)),
                    retry_after_ms,
                }
            } else {
                Error::ModelAuth(format!("HTTP {status}: {}", snippet(body)))
            }
        }
        400 | 413 | 422 if CONTEXT_MARKERS.iter().any(|m| lower.contains(m)) => {
            Error::ModelContext(format!("HTTP {status}: {}", snippet(body)))
        }
        400 | 422 => Error::ModelBadRequest(format!("HTTP {status}: {}", snippet(body))),
        408 | 429 => Error::ModelRetryable {
            message: format!("HTTP {status}: {}", snippet(body)),
            retry_after_ms,
        },
        500..=599 => Error::ModelRetryable {
            message: format!("HTTP {status}: {}", snippet(body)),
            retry_after_ms,
        },
        other => Error::Fatal(format!("HTTP {other}: {}", snippet(body))),
    }
}

/// Classify a transport-level failure (connect, timeout, truncated body).
pub fn classify_transport(err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        return Error::Timeout(format!("model request timed out: {err}"));
    }
    // Connection resets and truncated streams are worth a retry.
    Error::ModelRetryable {
        message: format!("transport: {err}"),
        retry_after_ms: None,
    }
}

/// Parse a `Retry-After` header value (delta-seconds form) to milliseconds.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|s| s * 1_000)
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 300 {
        trimmed.to_string()
    } else {
        let mut i = 300;
        while i > 0 && !trimmed.is_char_boundary(i) {
            i -= 1;
        }
        format!("{}…", &trimmed[..i])
    }
}
