use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Docker(#[from] docker_api::Error),

    #[error("invalid image name {name}: {reason}")]
    InvalidImageName { name: String, reason: String },

    #[error("pull of {image} failed: {reason}")]
    PullFailed { image: String, reason: String },

    #[error("invalid duration expression {expression}: {reason}")]
    InvalidDuration { expression: String, reason: String },

    #[error("container {image} not ready after {timeout:?}")]
    StartTimeout { image: String, timeout: Duration },

    #[error("secure mode needs a certificates directory")]
    MissingCertificates,

    #[error("container is not running")]
    NotRunning,

    #[error("container state lock poisoned")]
    StatePoisoned,
}

impl Error {
    pub(crate) fn invalid_image<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Error::InvalidImageName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
