// Error types for the GraphKB client

/// Errors that can occur during GraphKB operations
#[derive(Debug, thiserror::Error)]
pub enum GraphKbError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {endpoint} failed with status {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("{0}")]
    FeatureNotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("expected {expected} records but found {found}: {context}")]
    RecordCount {
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphKbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphKbError::Status {
            endpoint: "query".to_string(),
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Request to query failed with status 500: boom"
        );

        let err = GraphKbError::RecordCount {
            expected: 1,
            found: 0,
            context: "source oncokb".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "expected 1 records but found 0: source oncokb"
        );

        let err = GraphKbError::NotImplemented("cytoband".to_string());
        assert_eq!(err.to_string(), "not implemented: cytoband");
    }
}
