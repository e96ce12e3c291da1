use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("no work items found matching '{pattern}'")]
    NotFound { pattern: String },
    #[error("{failed} of {total} work items failed to update")]
    PartialBatchFailure { failed: usize, total: usize },
    #[error("{target_id}: {message}")]
    Remote { target_id: String, message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;

    #[test]
    fn remote_error_keeps_collaborator_text() {
        let error = CoreError::Remote {
            target_id: "wi-1".to_string(),
            message: "HTTP 409: state transition not allowed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "wi-1: HTTP 409: state transition not allowed"
        );
    }

    #[test]
    fn partial_failure_reports_counts() {
        let error = CoreError::PartialBatchFailure {
            failed: 1,
            total: 3,
        };
        assert_eq!(error.to_string(), "1 of 3 work items failed to update");
    }
}
