// Diagnostics accumulator
// Resource handlers collect errors and warnings here instead of an ambient context value

use serde::{Deserialize, Serialize};

use crate::error::{ErrorClass, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl From<&ProviderError> for Diagnostic {
    fn from(err: &ProviderError) -> Self {
        let summary = match err.class() {
            ErrorClass::Configuration => "Invalid configuration",
            ErrorClass::Transient => "Database operation failed",
            ErrorClass::Consistency => "Object is in an unknown state",
            ErrorClass::AmbiguousExistence => "Object already exists",
            ErrorClass::Cancelled => "Operation cancelled",
        };

        let detail = match err {
            ProviderError::AlreadyExists { id, .. } => format!(
                "{}\n\nTo manage the existing object, import it with id:\n  {}",
                err, id
            ),
            ProviderError::ConsistencyFault(_) => format!(
                "{}\n\nThe object may exist; inspect the database before re-running.",
                err
            ),
            _ => err.to_string(),
        };

        Diagnostic {
            severity: Severity::Error,
            summary: summary.to_string(),
            detail,
        }
    }
}

/// Ordered collection of diagnostics for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.items.push(Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
        });
    }

    pub fn add_warning(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
        });
    }

    pub fn push_error(&mut self, err: &ProviderError) {
        self.items.push(Diagnostic::from(err));
    }

    /// Record the error of a failed call; `None` tells the caller to stop
    pub fn capture<T>(&mut self, result: Result<T, ProviderError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.push_error(&err);
                None
            }
        }
    }

    pub fn has_error(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.add_warning("Deprecated", "use something else");
        assert!(!diags.has_error());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_capture_short_circuits() {
        let mut diags = Diagnostics::new();
        let ok: Option<i32> = diags.capture(Ok(5));
        assert_eq!(ok, Some(5));
        assert!(!diags.has_error());

        let failed: Option<i32> = diags.capture(Err(ProviderError::QueryFailed("boom".to_string())));
        assert!(failed.is_none());
        assert!(diags.has_error());
        let first = diags.iter().next().unwrap();
        assert_eq!(first.summary, "Database operation failed");
        assert!(first.detail.contains("boom"));
    }

    #[test]
    fn test_already_exists_detail_carries_import_id() {
        let err = ProviderError::AlreadyExists {
            kind: "role",
            id: "sqlserver::s:1433:db/role/5".to_string(),
            source: Box::new(ProviderError::QueryFailed("exists".to_string())),
        };
        let diag = Diagnostic::from(&err);
        assert_eq!(diag.summary, "Object already exists");
        assert!(diag.detail.contains("import it with id:\n  sqlserver::s:1433:db/role/5"));
    }

    #[test]
    fn test_extend_keeps_order() {
        let mut first = Diagnostics::new();
        first.add_error("a", "1");
        let mut second = Diagnostics::new();
        second.add_warning("b", "2");
        first.extend(second);
        let summaries: Vec<_> = first.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["a", "b"]);
    }
}
