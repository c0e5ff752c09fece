// Error types for report creation and upload

use pori_graphkb::GraphKbError;

/// Errors that can occur while building or uploading a report
#[derive(Debug, thiserror::Error)]
pub enum IprError {
    #[error("GraphKB error: {0}")]
    GraphKb(#[from] GraphKbError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {endpoint} failed with status {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Report content does not match the schema: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report upload failed: {0}")]
    UploadFailed(String),
}

impl IprError {
    pub fn validation(message: impl Into<String>) -> Self {
        IprError::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, IprError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IprError::Status {
            endpoint: "reports".to_string(),
            status: 400,
            message: "missing patientId".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Request to reports failed with status 400: missing patientId"
        );

        let err = IprError::validation("duplicate key");
        assert_eq!(err.to_string(), "Invalid input: duplicate key");
    }

    #[test]
    fn test_from_graphkb_error() {
        let err: IprError = GraphKbError::FeatureNotFound("KRAS".to_string()).into();
        assert!(matches!(err, IprError::GraphKb(GraphKbError::FeatureNotFound(_))));
    }
}
