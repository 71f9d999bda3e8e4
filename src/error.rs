use thiserror::Error;

/// Crate-wide error type returned by anything that can fail in a way the
/// caller (the proxy shell embedding this router) is expected to handle.
///
/// Expected, user-facing conditions (unknown collection, bad method, no
/// healthy host) never reach this type — they are folded into a
/// [`crate::router::RouteDecision::Reject`] instead. Only unexpected
/// failures (fatal directory errors, misconfiguration) propagate here.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("directory error: {0}")]
    Directory(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

impl From<serde_json::Error> for RouterError {
    fn from(e: serde_json::Error) -> Self {
        RouterError::Serialization(e.to_string())
    }
}

impl From<crate::directory::DirectoryError> for RouterError {
    fn from(e: crate::directory::DirectoryError) -> Self {
        match e {
            crate::directory::DirectoryError::Fatal(msg) => RouterError::Directory(msg),
            crate::directory::DirectoryError::Transient(msg) => {
                // A transient error should never escape the memoizer's retry
                // loop; if one does (e.g. the loop was cancelled), surface it
                // as a directory error rather than silently losing it.
                RouterError::Directory(format!("unresolved transient error: {msg}"))
            }
        }
    }
}

impl From<sqlx::Error> for RouterError {
    fn from(e: sqlx::Error) -> Self {
        RouterError::Directory(e.to_string())
    }
}

impl From<redis::RedisError> for RouterError {
    fn from(e: redis::RedisError) -> Self {
        RouterError::Internal(e.to_string())
    }
}

impl From<crate::liveness::LivenessError> for RouterError {
    fn from(e: crate::liveness::LivenessError) -> Self {
        RouterError::Internal(e.0)
    }
}
