//! Crate-wide error type.

use crate::provider::CloudProviderError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("finalizer error: {0}")]
    FinalizerError(#[from] kube::runtime::finalizer::Error<Error>),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parameter error: {0}")]
    ParameterError(String),

    #[error("cloud provider error: {0}")]
    Provider(#[from] CloudProviderError),

    #[error("stack not found")]
    StackNotFound,

    #[error("unauthorized to operate on this stack")]
    Unauthorized,

    #[error("operation aborted")]
    Aborted,

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error-policy should requeue quickly or back off.
    ///
    /// Validation/parameter errors are user-fixable and get written to
    /// status instead of hammered with retries.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Error::ValidationError(_) | Error::ParameterError(_) | Error::Unauthorized
        )
    }
}
