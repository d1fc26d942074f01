use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid FQN {fqn:?}: {reason}")]
    InvalidFqn { fqn: String, reason: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Object already exists: {0}")]
    ObjectExists(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("No mountpaths available")]
    NoMountpaths,

    #[error("Out of space: {0}")]
    OutOfSpace(String),

    /// Raised by a job (or one of its joggers) that stopped before completing its walk.
    #[error("{what} aborted: {details}")]
    Aborted { what: String, details: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No receive handler registered for {0}")]
    NoRecvHandler(String),

    #[error("Xaction not found: {0}")]
    XactNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TesseraError>;

impl TesseraError {
    pub fn aborted(what: impl Into<String>, details: impl Into<String>) -> Self {
        TesseraError::Aborted {
            what: what.into(),
            details: details.into(),
        }
    }

    /// True for out-of-space conditions, including disk-full I/O errors.
    pub fn is_out_of_space(&self) -> bool {
        match self {
            TesseraError::OutOfSpace(_) => true,
            TesseraError::Io(err) => is_io_out_of_space(err),
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TesseraError::Aborted { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            TesseraError::ObjectNotFound(_) | TesseraError::XactNotFound(_) => true,
            TesseraError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub(crate) fn is_io_out_of_space(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::ENOSPC as i32)
        || err.kind() == std::io::ErrorKind::StorageFull
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_space_classification() {
        assert!(TesseraError::OutOfSpace("disk".to_string()).is_out_of_space());

        let enospc = std::io::Error::from_raw_os_error(nix::errno::Errno::ENOSPC as i32);
        assert!(TesseraError::Io(enospc).is_out_of_space());

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(!TesseraError::Io(other).is_out_of_space());
        assert!(!TesseraError::Internal("x".to_string()).is_out_of_space());
    }

    #[test]
    fn test_aborted_display() {
        let err = TesseraError::aborted("copy-bck(\"01J\")", "mountpath full");
        assert!(err.is_aborted());
        assert_eq!(err.to_string(), "copy-bck(\"01J\") aborted: mountpath full");
    }
}
