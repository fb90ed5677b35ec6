//! Channel errors

/// Errors surfaced by channel operations
///
/// Transient network failures never appear here; they are retried
/// internally with fixed backoff. What does surface is the channel
/// lifecycle (timed out), broken persisted state, and database failures.
#[derive(Debug)]
pub enum ChannelError {
    /// The channel is past its timeout and cannot be used for sending
    TimedOut,
    /// A required persisted field is absent or unreadable; blind retry
    /// would loop forever, so the operation is aborted for external repair
    CorruptState(String),
    /// Database error
    Database(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::TimedOut => write!(f, "channel has timed out"),
            ChannelError::CorruptState(e) => write!(f, "corrupt channel state: {}", e),
            ChannelError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<rusqlite::Error> for ChannelError {
    fn from(e: rusqlite::Error) -> Self {
        ChannelError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ChannelError::TimedOut.to_string(), "channel has timed out");
        assert_eq!(
            ChannelError::CorruptState("no fetchSlot".to_string()).to_string(),
            "corrupt channel state: no fetchSlot"
        );
        assert_eq!(
            ChannelError::Database("locked".to_string()).to_string(),
            "database error: locked"
        );
    }

    #[test]
    fn test_from_rusqlite() {
        let err: ChannelError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, ChannelError::Database(_)));
    }
}
