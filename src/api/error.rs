//! Failure classification with retry eligibility.

use std::time::Duration;

/// Category assigned to a failed request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connectivity is absent at the environment level.
    Network,
    /// The backend answered with a 5xx status.
    Server,
    /// The backend answered with a status that a retry cannot fix (404).
    Client,
    /// The attempt exceeded its deadline.
    Timeout,
    /// The connection was blocked before a usable response existed.
    Cors,
    /// Unrecognized failure shape.
    Unknown,
}

/// A raw failure mapped into exactly one category with a retry decision.
///
/// Derived transiently per attempt; never stored beyond it.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub message: String,
    pub status_code: u16,
    pub kind: ErrorKind,
    pub retryable: bool,
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClassifiedError {}

/// Failure of a single attempt, before classification.
#[derive(Debug)]
pub(crate) enum RawFailure {
    /// The transport failed without producing an HTTP status.
    Transport(reqwest::Error),
    /// The backend answered with a non-2xx status. `message` is the
    /// best-effort human-readable text extracted from the body.
    Status { status: u16, message: Option<String> },
    /// A 2xx body could not be parsed as JSON.
    Decode(serde_json::Error),
    /// The attempt outlived its per-attempt deadline.
    DeadlineElapsed(Duration),
}

/// Map a raw failure into exactly one [`ClassifiedError`].
///
/// First match wins: 404 is permanent, 5xx and timeouts are transient,
/// and unrecognized failures stay eligible for retry.
pub(crate) fn classify(failure: &RawFailure) -> ClassifiedError {
    // Connectivity absent at the environment level.
    if let RawFailure::Transport(error) = failure
        && error.is_connect()
    {
        return ClassifiedError {
            message: "Network unavailable. Check your connection.".to_string(),
            status_code: 0,
            kind: ErrorKind::Network,
            retryable: true,
        };
    }

    if let RawFailure::Status { status, message } = failure {
        // Not found will not improve on retry.
        if *status == 404 {
            return ClassifiedError {
                message: message
                    .clone()
                    .unwrap_or_else(|| "The requested resource was not found".to_string()),
                status_code: 404,
                kind: ErrorKind::Client,
                retryable: false,
            };
        }

        // Server-side failures are transient.
        if *status >= 500 {
            return ClassifiedError {
                message: message
                    .clone()
                    .unwrap_or_else(|| format!("Server error (HTTP {status}). Please try again later.")),
                status_code: *status,
                kind: ErrorKind::Server,
                retryable: true,
            };
        }

        // A zero status means the connection was blocked before any
        // response existed.
        if *status == 0 {
            return ClassifiedError {
                message: "Request blocked before reaching the server".to_string(),
                status_code: 0,
                kind: ErrorKind::Cors,
                retryable: false,
            };
        }
    }

    let text = failure_text(failure);

    // Cross-origin rejections only surface through the message text.
    if is_blocked_connection(&text) {
        return ClassifiedError {
            message: "Request blocked before reaching the server".to_string(),
            status_code: 0,
            kind: ErrorKind::Cors,
            retryable: false,
        };
    }

    // Deadline or abort.
    let timed_out = match failure {
        RawFailure::DeadlineElapsed(_) => true,
        RawFailure::Transport(error) => error.is_timeout() || is_timeout_text(&text),
        _ => is_timeout_text(&text),
    };
    if timed_out {
        return ClassifiedError {
            message: "Request timed out. Please try again.".to_string(),
            status_code: 0,
            kind: ErrorKind::Timeout,
            retryable: true,
        };
    }

    // Unrecognized, possibly transient.
    let status_code = match failure {
        RawFailure::Status { status, .. } => *status,
        _ => 0,
    };
    ClassifiedError {
        message: if text.is_empty() {
            "Request failed for an unknown reason".to_string()
        } else {
            text
        },
        status_code,
        kind: ErrorKind::Unknown,
        retryable: true,
    }
}

fn failure_text(failure: &RawFailure) -> String {
    match failure {
        RawFailure::Transport(error) => error.to_string(),
        RawFailure::Status { message, .. } => message.clone().unwrap_or_default(),
        RawFailure::Decode(error) => format!("Failed to parse response body: {error}"),
        RawFailure::DeadlineElapsed(limit) => format!("Attempt exceeded its {limit:?} deadline"),
    }
}

fn is_blocked_connection(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("cors")
        || lower.contains("cross-origin")
        || lower.contains("access control")
}

fn is_timeout_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("timed out") || lower.contains("timeout")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_classify_connect_error_as_network() {
        // Port 1 is never listening; reqwest reports a connect error.
        let error = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();

        let classified = classify(&RawFailure::Transport(error));
        assert_eq!(classified.kind, ErrorKind::Network);
        assert_eq!(classified.status_code, 0);
        assert!(classified.retryable);
    }

    #[test]
    fn test_classify_404_is_permanent() {
        let classified = classify(&RawFailure::Status {
            status: 404,
            message: Some("Policy not found".to_string()),
        });

        assert_eq!(classified.kind, ErrorKind::Client);
        assert_eq!(classified.status_code, 404);
        assert!(!classified.retryable);
        assert_eq!(classified.message, "Policy not found");
    }

    #[test]
    fn test_classify_404_without_body_message() {
        let classified = classify(&RawFailure::Status {
            status: 404,
            message: None,
        });

        assert!(!classified.retryable);
        assert!(classified.message.contains("not found"));
    }

    #[test]
    fn test_classify_5xx_is_transient() {
        for status in [500, 502, 503, 504] {
            let classified = classify(&RawFailure::Status {
                status,
                message: None,
            });

            assert_eq!(classified.kind, ErrorKind::Server);
            assert_eq!(classified.status_code, status);
            assert!(classified.retryable);
        }
    }

    #[test]
    fn test_classify_5xx_keeps_body_message() {
        let classified = classify(&RawFailure::Status {
            status: 500,
            message: Some("database unavailable".to_string()),
        });

        assert_eq!(classified.message, "database unavailable");
    }

    #[test]
    fn test_classify_status_zero_as_blocked() {
        let classified = classify(&RawFailure::Status {
            status: 0,
            message: None,
        });

        assert_eq!(classified.kind, ErrorKind::Cors);
        assert!(!classified.retryable);
    }

    #[test]
    fn test_classify_cross_origin_message_as_blocked() {
        let classified = classify(&RawFailure::Status {
            status: 418,
            message: Some("blocked by CORS policy".to_string()),
        });

        assert_eq!(classified.kind, ErrorKind::Cors);
        assert!(!classified.retryable);
    }

    #[test]
    fn test_classify_deadline_as_timeout() {
        let classified = classify(&RawFailure::DeadlineElapsed(Duration::from_secs(10)));

        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert!(classified.retryable);
        assert!(classified.message.contains("timed out"));
    }

    #[test]
    fn test_classify_timeout_message_as_timeout() {
        let classified = classify(&RawFailure::Status {
            status: 408,
            message: Some("request timeout".to_string()),
        });

        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert!(classified.retryable);
    }

    #[test]
    fn test_classify_other_4xx_fails_open() {
        // Only 404 is modeled as permanent; other client statuses are
        // treated as unrecognized and stay eligible for retry.
        let classified = classify(&RawFailure::Status {
            status: 403,
            message: Some("forbidden".to_string()),
        });

        assert_eq!(classified.kind, ErrorKind::Unknown);
        assert_eq!(classified.status_code, 403);
        assert!(classified.retryable);
        assert_eq!(classified.message, "forbidden");
    }

    #[test]
    fn test_classify_decode_failure_as_unknown() {
        let error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let classified = classify(&RawFailure::Decode(error));

        assert_eq!(classified.kind, ErrorKind::Unknown);
        assert!(classified.retryable);
        assert!(classified.message.contains("parse"));
    }

    #[test]
    fn test_classified_error_display_is_message() {
        let classified = classify(&RawFailure::Status {
            status: 500,
            message: Some("boom".to_string()),
        });

        assert_eq!(classified.to_string(), "boom");
    }
}
