//! Error types and retry classification for upstream fetches.

use reqwest::StatusCode;
use thiserror::Error;

/// How the batch engine reacts to a failed upstream call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Batch too large or rejected as invalid; bisect and retry the halves.
    Split,
    /// Throttled or server-side failure; retry the same batch after a delay.
    Backoff,
    /// Terminal for this call.
    Never,
}

/// Errors surfaced by providers and their decorators.
///
/// `Clone` so one coalesced refresh result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeout or connection failure before a status was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream rejected the request as oversized or invalid (400/413).
    #[error("upstream rejected batch (status {status}): {body}")]
    Oversize { status: u16, body: String },

    /// Upstream throttled us or failed server-side (429/5xx).
    #[error("upstream transient failure (status {status}): {body}")]
    Transient { status: u16, body: String },

    /// Any other non-success status, e.g. auth failures.
    #[error("upstream rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Upstream answered 2xx but flagged the call as failed in its envelope.
    #[error("provider error: code={code} msg={message:?}")]
    Api { code: i64, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("cancelled")]
    Cancelled,

    #[error("misconfigured provider: {0}")]
    Config(String),

    #[error("no data from any dimension")]
    NoData,
}

/// Longest body snippet kept in an error message.
const BODY_SNIPPET: usize = 2048;

impl ProviderError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let status = status.as_u16();
        let body: String = body.chars().take(BODY_SNIPPET).collect();
        match status {
            400 | 413 => Self::Oversize { status, body },
            429 | 500..=599 => Self::Transient { status, body },
            _ => Self::Rejected { status, body },
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Oversize { .. } => RetryClass::Split,
            Self::Transient { .. } => RetryClass::Backoff,
            Self::Transport(_)
            | Self::Rejected { .. }
            | Self::Api { .. }
            | Self::Decode(_)
            | Self::Cancelled
            | Self::Config(_)
            | Self::NoData => RetryClass::Never,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Failure of a whole multi-provider fetch.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("no providers configured")]
    NoProviders,

    #[error("no quotes received: {}", format_causes(.causes))]
    NoQuotes { causes: Vec<(String, ProviderError)> },
}

fn format_causes(causes: &[(String, ProviderError)]) -> String {
    causes
        .iter()
        .map(|(name, e)| format!("{}: {}", name, e))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let e = ProviderError::from_status(StatusCode::BAD_REQUEST, "too many");
        assert_eq!(e.retry_class(), RetryClass::Split);
        let e = ProviderError::from_status(StatusCode::PAYLOAD_TOO_LARGE, "");
        assert_eq!(e.retry_class(), RetryClass::Split);
        let e = ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(e.retry_class(), RetryClass::Backoff);
        let e = ProviderError::from_status(StatusCode::BAD_GATEWAY, "");
        assert_eq!(e.retry_class(), RetryClass::Backoff);
        let e = ProviderError::from_status(StatusCode::UNAUTHORIZED, "");
        assert_eq!(e.retry_class(), RetryClass::Never);
        assert!(matches!(e, ProviderError::Rejected { status: 401, .. }));
    }

    #[test]
    fn terminal_errors_never_retry() {
        for e in [
            ProviderError::Transport("reset".into()),
            ProviderError::Decode("eof".into()),
            ProviderError::Cancelled,
            ProviderError::Api { code: 7, message: "bad key".into() },
        ] {
            assert_eq!(e.retry_class(), RetryClass::Never);
        }
    }

    #[test]
    fn body_is_truncated() {
        let long = "x".repeat(10_000);
        match ProviderError::from_status(StatusCode::FORBIDDEN, &long) {
            ProviderError::Rejected { body, .. } => assert_eq!(body.len(), BODY_SNIPPET),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_quotes_lists_every_cause() {
        let e = FetchError::NoQuotes {
            causes: vec![
                ("SteamDT".into(), ProviderError::Cancelled),
                ("Pricempire".into(), ProviderError::Transport("refused".into())),
            ],
        };
        assert_eq!(
            e.to_string(),
            "no quotes received: SteamDT: cancelled; Pricempire: transport error: refused"
        );
    }
}
