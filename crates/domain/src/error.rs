/// Shared error type used across all node crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    /// Timeout, connection refused, or a 5xx from a registry. Retryable.
    #[error("transient network: {0}")]
    TransientNetwork(String),

    /// A 4xx (other than 409) from a registry. Logged, never retried.
    #[error("permanent network: {0}")]
    PermanentNetwork(String),

    /// 409 from a registry: the resource is already there.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A resource declared a parent id that is not in the store.
    #[error("dangling reference: {child} -> {parent}")]
    DanglingReference { child: String, parent: String },

    /// Operation attempted after controlled shutdown began.
    #[error("shutting down")]
    Shutdown,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify an HTTP status from a registry per the retry policy:
    /// 409 is benign, other 4xx are permanent, 5xx transient.
    pub fn from_registry_status(status: u16, context: &str) -> Option<Error> {
        match status {
            200..=299 => None,
            409 => Some(Error::Conflict(context.to_string())),
            400..=499 => Some(Error::PermanentNetwork(format!("{status} {context}"))),
            _ => Some(Error::TransientNetwork(format!("{status} {context}"))),
        }
    }

    /// Whether the registration client should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_status_classification() {
        assert!(Error::from_registry_status(200, "post").is_none());
        assert!(Error::from_registry_status(201, "post").is_none());
        assert!(matches!(
            Error::from_registry_status(409, "post"),
            Some(Error::Conflict(_))
        ));
        assert!(matches!(
            Error::from_registry_status(400, "post"),
            Some(Error::PermanentNetwork(_))
        ));
        assert!(matches!(
            Error::from_registry_status(500, "post"),
            Some(Error::TransientNetwork(_))
        ));
    }

    #[test]
    fn only_5xx_is_transient() {
        assert!(Error::from_registry_status(503, "hb").unwrap().is_transient());
        assert!(!Error::from_registry_status(404, "hb").unwrap().is_transient());
    }
}
