use std::fmt;

/// Direction of a failed synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    ToRemote,
    FromRemote,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::ToRemote => write!(f, "toRemote"),
            SyncDirection::FromRemote => write!(f, "fromRemote"),
        }
    }
}

/// Transport-level failures: connection drops, handshake rejections,
/// malformed frames. Recovered by reconnect on the client and by connection
/// teardown on the server; never fatal to a room.
#[derive(Debug)]
pub enum TransportError {
    Connect(String),
    Closed,
    InvalidFrame(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "Connection failed: {}", e),
            TransportError::Closed => write!(f, "Connection closed"),
            TransportError::InvalidFrame(e) => write!(f, "Invalid frame: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// A remote update payload that could not be merged. The offending update is
/// rejected and the document state is left untouched.
#[derive(Debug)]
pub struct MergeError {
    pub reason: String,
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Update rejected: {}", self.reason)
    }
}

impl std::error::Error for MergeError {}

/// Durable-storage failures. Retried with bounded backoff; relay to peers
/// continues regardless.
#[derive(Debug)]
pub enum PersistError {
    Unavailable(String),
    Query(String),
    Corrupt(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Unavailable(e) => write!(f, "Storage unavailable: {}", e),
            PersistError::Query(e) => write!(f, "Storage query failed: {}", e),
            PersistError::Corrupt(e) => write!(f, "Stored document corrupt: {}", e),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<sqlx::Error> for PersistError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                PersistError::Unavailable(e.to_string())
            }
            other => PersistError::Query(other.to_string()),
        }
    }
}

/// The local view refused a remote apply after the bounded retry budget.
#[derive(Debug)]
pub struct ReadinessError {
    pub attempts: u32,
}

impl fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Local view not ready after {} attempts",
            self.attempts
        )
    }
}

impl std::error::Error for ReadinessError {}
