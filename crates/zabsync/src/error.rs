use thiserror::Error;

/// Error type shared across the synchronization pipeline.
#[derive(Debug, Error)]
pub enum ZabError {
    /// HTTP transport errors talking to the Zabbix server
    #[error("HTTP error: {0}")]
    Http(String),

    /// Errors reported by the Zabbix API itself
    #[error("Zabbix API error in '{method}': {message}")]
    Api { method: String, message: String },

    /// Database access or transaction errors
    #[error("database error: {0}")]
    Database(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// A host or map entry that fails validation
    #[error("validation error: {0}")]
    Validation(String),

    /// A fault raised (or panicked) inside plugin code
    #[error("plugin '{name}' failed: {reason}")]
    Plugin { name: String, reason: String },

    /// Bad or missing configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ZabError {
    fn from(err: reqwest::Error) -> Self {
        ZabError::Http(err.to_string())
    }
}

impl From<rusqlite::Error> for ZabError {
    fn from(err: rusqlite::Error) -> Self {
        ZabError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ZabError {
    fn from(err: serde_json::Error) -> Self {
        ZabError::Json(format!(
            "{} at line {} column {}",
            err,
            err.line(),
            err.column()
        ))
    }
}

impl From<url::ParseError> for ZabError {
    fn from(err: url::ParseError) -> Self {
        ZabError::Config(format!("invalid URL: {}", err))
    }
}
