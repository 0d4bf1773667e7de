// Provider error taxonomy
// Every fallible operation in the crate returns ProviderError; the class decides operator guidance

use thiserror::Error;

/// Broad classification used for retry decisions and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or configuration. Never retried.
    Configuration,
    /// Dial, ping or statement failure. The operator may re-run.
    Transient,
    /// The object may exist in an unknown state.
    Consistency,
    /// The object exists already and should be imported.
    AmbiguousExistence,
    /// The request was cancelled or ran out of time.
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("invalid connection id '{id}': {reason}")]
    InvalidConnectionId { id: String, reason: String },

    #[error("invalid provider '{provider}' in connection id '{id}'; expected one of sqlserver, synapse, synapsededicated, fabric")]
    InvalidProvider { id: String, provider: String },

    #[error("invalid port '{port}' in connection id '{id}'")]
    InvalidPort { id: String, port: String },

    #[error("expected a {expected} connection but received a {actual} connection: '{connection_id}'")]
    ScopeMismatch {
        connection_id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("exactly one of server or database must be set (server: '{server}', database: '{database}')")]
    ConflictingScope { server: String, database: String },

    #[error("invalid resource id '{id}': {reason}")]
    IdFormat { id: String, reason: String },

    #[error("resource id '{id}' belongs to connection '{id_connection}', not '{connection_id}'")]
    ConnectionMismatch {
        id: String,
        id_connection: String,
        connection_id: String,
    },

    #[error("connection to '{connection_id}' failed: {message}")]
    ConnectionFailed { connection_id: String, message: String },

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("{kind} already exists with id '{id}'; import it instead of creating it ({source})")]
    AlreadyExists {
        kind: &'static str,
        id: String,
        #[source]
        source: Box<ProviderError>,
    },

    #[error("{0}")]
    ConsistencyFault(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} cannot be updated in place; it must be replaced")]
    UpdateNotSupported { kind: &'static str },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::InvalidConnectionId { .. }
            | ProviderError::InvalidProvider { .. }
            | ProviderError::InvalidPort { .. }
            | ProviderError::ScopeMismatch { .. }
            | ProviderError::ConflictingScope { .. }
            | ProviderError::IdFormat { .. }
            | ProviderError::ConnectionMismatch { .. }
            | ProviderError::UpdateNotSupported { .. }
            | ProviderError::InvalidInput(_)
            | ProviderError::NotFound { .. }
            | ProviderError::Config(_) => ErrorClass::Configuration,
            ProviderError::ConnectionFailed { .. } | ProviderError::QueryFailed(_) => ErrorClass::Transient,
            ProviderError::ConsistencyFault(_) => ErrorClass::Consistency,
            ProviderError::AlreadyExists { .. } => ErrorClass::AmbiguousExistence,
            ProviderError::Cancelled | ProviderError::Timeout(_) => ErrorClass::Cancelled,
        }
    }

    /// Whether re-running the same operation can succeed without changing any input
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub(crate) fn id_format(id: &str, reason: impl Into<String>) -> Self {
        ProviderError::IdFormat {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<tiberius::error::Error> for ProviderError {
    fn from(err: tiberius::error::Error) -> Self {
        ProviderError::QueryFailed(err.to_string())
    }
}

impl<E: std::error::Error + 'static> From<bb8::RunError<E>> for ProviderError {
    fn from(err: bb8::RunError<E>) -> Self {
        ProviderError::QueryFailed(format!("connection pool error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        let err = ProviderError::ScopeMismatch {
            connection_id: "sqlserver::s:1433".to_string(),
            expected: "database",
            actual: "server",
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "expected a database connection but received a server connection: 'sqlserver::s:1433'"
        );
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = ProviderError::ConnectionFailed {
            connection_id: "sqlserver::s:1433".to_string(),
            message: "login timeout".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_missing_object_is_not_retryable() {
        let err = ProviderError::NotFound {
            kind: "view",
            key: "sqlserver::s:1433:db/view/300".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_already_exists_names_the_id() {
        let err = ProviderError::AlreadyExists {
            kind: "schema",
            id: "sqlserver::s:1433:db/schema/7".to_string(),
            source: Box::new(ProviderError::QueryFailed("duplicate".to_string())),
        };
        assert_eq!(err.class(), ErrorClass::AmbiguousExistence);
        assert!(err.to_string().contains("sqlserver::s:1433:db/schema/7"));
    }
}
