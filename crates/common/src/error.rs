use thiserror::Error;

/// Errors talking to the chain-data provider.
///
/// `RateLimited`, `Unavailable` and `Transport` are transient and retried by
/// the client with exponential backoff; the rest fail the call immediately.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rejected request ({status}): {message}")]
    Request { status: u16, message: String },

    #[error("provider rate limited (429)")]
    RateLimited,

    #[error("provider unavailable ({status})")]
    Unavailable { status: u16 },

    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rpc error: {0}")]
    Rpc(String),

    #[error("provider returned malformed payload: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unavailable { .. } | Self::Transport(_)
        )
    }
}

/// A raw-archive write that did not reach durable storage.
#[derive(Debug, Error)]
#[error("archive write failed: {0}")]
pub struct ArchiveError(#[from] pub rusqlite::Error);

/// Scoring invariant violations. Always a bug upstream, never retried.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("component scores incomplete: missing {0}")]
    IncompleteComponents(&'static str),
}

#[derive(Debug, Error)]
#[error("invalid wallet address: expected 0x followed by 40 hex characters")]
pub struct AddressError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Unavailable { status: 503 }.is_retryable());
        assert!(!ProviderError::Request {
            status: 400,
            message: "bad address".into()
        }
        .is_retryable());
        assert!(!ProviderError::Rpc("boom".into()).is_retryable());
    }

    #[test]
    fn test_messages_are_user_safe() {
        let e = ProviderError::Unavailable { status: 502 };
        assert_eq!(e.to_string(), "provider unavailable (502)");
        let e = ScoreError::IncompleteComponents("risk");
        assert!(e.to_string().contains("risk"));
    }
}
