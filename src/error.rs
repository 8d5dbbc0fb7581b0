//! Typed error taxonomy for the session loop and process bootstrap.
//!
//! `UnknownImei` and `Store` are recoverable — callers log and move on
//! (spec §7; malformed frames never reach this enum at all, since
//! `codec::parse_line` drops them at the `Option` level). Only `Io` ends a
//! session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("lock record not found for imei {0}")]
    UnknownImei(String),

    #[error("store operation failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this error should end the owning session (vs. just being logged).
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, SessionError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_errors_are_fatal_to_the_session() {
        let io = SessionError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken"));
        assert!(io.is_fatal_to_session());

        let unknown = SessionError::UnknownImei("862461040000001".to_string());
        assert!(!unknown.is_fatal_to_session());
    }
}
