// Database Driver Traits
// The seam between the connection cache / entity repositories and a concrete SQL driver

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::connection::ConnectionDescriptor;
use crate::error::{ProviderError, ProviderResult};

/// Cell value in a result row, also used for parameter values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Binary(Vec<u8>),
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(v as i64)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::String(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// Named statement parameter, referenced as `@name` in SQL text
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub value: CellValue,
}

impl Param {
    pub fn new(name: &'static str, value: impl Into<CellValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// One row of a query result with its column names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<CellValue>,
}

impl Record {
    pub fn new(columns: Vec<String>, values: Vec<CellValue>) -> Self {
        Self { columns, values }
    }

    pub fn from_pairs(pairs: &[(&str, CellValue)]) -> Self {
        Self {
            columns: pairs.iter().map(|(name, _)| name.to_string()).collect(),
            values: pairs.iter().map(|(_, value)| value.clone()).collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|idx| &self.values[idx])
    }

    pub fn get_i64(&self, column: &str) -> ProviderResult<i64> {
        match self.get(column) {
            Some(CellValue::Int(v)) => Ok(*v),
            Some(CellValue::Bool(v)) => Ok(*v as i64),
            other => Err(unexpected(column, "integer", other)),
        }
    }

    pub fn get_opt_i64(&self, column: &str) -> ProviderResult<Option<i64>> {
        match self.get(column) {
            Some(CellValue::Null) => Ok(None),
            _ => self.get_i64(column).map(Some),
        }
    }

    pub fn get_bool(&self, column: &str) -> ProviderResult<bool> {
        match self.get(column) {
            Some(CellValue::Bool(v)) => Ok(*v),
            Some(CellValue::Int(v)) => Ok(*v != 0),
            other => Err(unexpected(column, "bit", other)),
        }
    }

    pub fn get_string(&self, column: &str) -> ProviderResult<String> {
        match self.get(column) {
            Some(CellValue::String(v)) => Ok(v.clone()),
            other => Err(unexpected(column, "string", other)),
        }
    }

    pub fn get_opt_string(&self, column: &str) -> ProviderResult<Option<String>> {
        match self.get(column) {
            Some(CellValue::Null) => Ok(None),
            _ => self.get_string(column).map(Some),
        }
    }
}

fn unexpected(column: &str, expected: &str, got: Option<&CellValue>) -> ProviderError {
    match got {
        None => ProviderError::QueryFailed(format!("column '{}' missing from result", column)),
        Some(value) => ProviderError::QueryFailed(format!(
            "column '{}' expected {} but got {:?}",
            column, expected, value
        )),
    }
}

/// A live driver handle. Owned by the connection cache; callers only borrow it.
#[async_trait::async_trait]
pub trait SqlHandle: Send + Sync {
    /// Lightweight round trip to prove the handle is usable
    async fn ping(&self) -> ProviderResult<()>;

    /// Execute a statement and return the number of rows affected
    async fn exec(&self, sql: &str, params: &[Param]) -> ProviderResult<u64>;

    /// Run a query and return its first row, if any
    async fn query_row(&self, sql: &str, params: &[Param]) -> ProviderResult<Option<Record>>;

    /// True once the handle has seen a transport failure or was closed out-of-band
    fn is_broken(&self) -> bool;
}

/// Opens driver handles for parsed connection descriptors
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, descriptor: &ConnectionDescriptor) -> ProviderResult<Arc<dyn SqlHandle>>;
}

/// Supplies Azure AD access tokens; credential acquisition lives outside this crate
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, resource: &str) -> ProviderResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lookup_is_case_insensitive() {
        let record = Record::from_pairs(&[("Schema_Id", CellValue::Int(7)), ("name", "sales".into())]);
        assert_eq!(record.get_i64("schema_id").unwrap(), 7);
        assert_eq!(record.get_string("NAME").unwrap(), "sales");
    }

    #[test]
    fn test_record_type_errors() {
        let record = Record::from_pairs(&[("name", CellValue::Null), ("flag", CellValue::Int(1))]);
        assert!(record.get_string("name").is_err());
        assert_eq!(record.get_opt_string("name").unwrap(), None);
        assert!(record.get_bool("flag").unwrap());
        assert!(record.get_i64("missing").is_err());
    }

    #[test]
    fn test_param_conversions() {
        assert_eq!(Param::new("id", 5i32).value, CellValue::Int(5));
        assert_eq!(Param::new("owner", None::<i64>).value, CellValue::Null);
        assert_eq!(Param::new("name", "dbo").value, CellValue::String("dbo".to_string()));
    }
}
