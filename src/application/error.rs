use thiserror::Error;

use crate::infra::error::InfraError;

/// Fatal startup error reported by `main` before exiting.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pubsub::PubsubError;

    #[test]
    fn infra_errors_keep_their_message() {
        let err = AppError::from(InfraError::database("connection refused"));
        assert_eq!(err.to_string(), "database error: connection refused");

        let err = AppError::from(InfraError::from(PubsubError::InMemoryDatabase));
        assert!(matches!(err, AppError::Infra(InfraError::Pubsub(_))));
    }

    #[test]
    fn validation_message_is_prefixed() {
        let err = AppError::validation("pubsub.project_id is not configured");
        assert_eq!(
            err.to_string(),
            "validation failed: pubsub.project_id is not configured"
        );
    }
}
