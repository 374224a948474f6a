use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateErrorCode {
    InvalidArgument,
    Remote,
    Store,
    NotFound,
    Superseded,
    Internal,
}

impl StateErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateErrorCode::InvalidArgument => "chat-state/invalid-argument",
            StateErrorCode::Remote => "chat-state/remote",
            StateErrorCode::Store => "chat-state/store",
            StateErrorCode::NotFound => "chat-state/not-found",
            StateErrorCode::Superseded => "chat-state/superseded",
            StateErrorCode::Internal => "chat-state/internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateError {
    pub code: StateErrorCode,
    message: String,
}

impl StateError {
    pub fn new(code: StateErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transport failures are the only errors a caller can expect to clear up by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, StateErrorCode::Remote)
    }
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for StateError {}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        store_error(format!("Failed to decode stored record: {err}"))
    }
}

pub type StateResult<T> = Result<T, StateError>;

pub fn invalid_argument(message: impl Into<String>) -> StateError {
    StateError::new(StateErrorCode::InvalidArgument, message)
}

pub fn remote_error(message: impl Into<String>) -> StateError {
    StateError::new(StateErrorCode::Remote, message)
}

pub fn store_error(message: impl Into<String>) -> StateError {
    StateError::new(StateErrorCode::Store, message)
}

pub fn not_found(message: impl Into<String>) -> StateError {
    StateError::new(StateErrorCode::NotFound, message)
}

pub fn superseded(operation: &str) -> StateError {
    StateError::new(
        StateErrorCode::Superseded,
        format!("'{operation}' was superseded by a newer request; its result was discarded."),
    )
}

pub fn internal_error(message: impl Into<String>) -> StateError {
    StateError::new(StateErrorCode::Internal, message)
}

/// Rejects zero page sizes before any remote or store work begins.
pub fn ensure_positive_limit(limit: usize, operation: &str) -> StateResult<usize> {
    if limit == 0 {
        return Err(invalid_argument(format!(
            "'{operation}' requires a positive page size"
        )));
    }
    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = invalid_argument("limit must be positive");
        assert_eq!(
            err.to_string(),
            "limit must be positive (chat-state/invalid-argument)"
        );
        assert!(!err.is_retryable());
        assert!(remote_error("offline").is_retryable());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = ensure_positive_limit(0, "load_more").unwrap_err();
        assert_eq!(err.code, StateErrorCode::InvalidArgument);
        assert_eq!(ensure_positive_limit(5, "load_more").unwrap(), 5);
    }

    #[test]
    fn decode_failures_map_to_store_errors() {
        let decode = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        assert_eq!(StateError::from(decode).code, StateErrorCode::Store);
    }
}
