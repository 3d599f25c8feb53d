use thiserror::Error;

/// Typed failure taxonomy for the scraping adapters.
///
/// Handlers translate these into queue transitions: account-state errors
/// terminate the task successfully with a blog status change, balance
/// exhaustion fails without retry, and everything transient re-queues with
/// backoff.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("account {username} is private")]
    PrivateAccount { username: String },

    #[error("user {username} not found")]
    UserNotFound { username: String },

    #[error("scraping balance exhausted")]
    InsufficientBalance,

    #[error("rate limited by scraping backend")]
    RateLimited,

    #[error("transient backend failure: {reason}")]
    Transient { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ScrapeError {
    /// Whether the queue should re-run the task after a backoff delay.
    ///
    /// Account-state outcomes (`PrivateAccount`, `UserNotFound`) are not
    /// retriable because the handler terminates the task successfully;
    /// `InsufficientBalance` is a hard stop until an operator intervenes.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            ScrapeError::PrivateAccount { .. }
            | ScrapeError::UserNotFound { .. }
            | ScrapeError::InsufficientBalance => false,
            ScrapeError::RateLimited | ScrapeError::Transient { .. } => true,
            ScrapeError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            ScrapeError::Deserialize { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_state_errors_are_not_retriable() {
        assert!(!ScrapeError::PrivateAccount {
            username: "a".to_string()
        }
        .is_retriable());
        assert!(!ScrapeError::UserNotFound {
            username: "a".to_string()
        }
        .is_retriable());
    }

    #[test]
    fn balance_exhaustion_is_a_hard_stop() {
        assert!(!ScrapeError::InsufficientBalance.is_retriable());
    }

    #[test]
    fn rate_limit_and_transient_are_retriable() {
        assert!(ScrapeError::RateLimited.is_retriable());
        assert!(ScrapeError::Transient {
            reason: "502".to_string()
        }
        .is_retriable());
    }
}
