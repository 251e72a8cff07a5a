/// Shared error type used across all Stagehand crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed inbound payload. Maps to 400 on the control plane.
    #[error("validation: {0}")]
    Validation(String),

    /// No runtime / agent / row for the requested entity. Maps to 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backpressure: the runtime mailbox is saturated. Maps to 409.
    #[error("busy: {0}")]
    Busy(String),

    /// Upstream model session failure (transient until retries exhaust).
    #[error("session {agent_type}: {message}")]
    Session {
        agent_type: String,
        message: String,
    },

    #[error("datastore: {0}")]
    Datastore(String),

    /// Irrecoverable: the runtime moves to `error` status.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry inside the same command handler is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Timeout(_) | Error::Session { .. } | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout("send".into()).is_transient());
        assert!(Error::Http("502".into()).is_transient());
        assert!(!Error::Validation("bad".into()).is_transient());
        assert!(!Error::Fatal("gone".into()).is_transient());
    }
}
