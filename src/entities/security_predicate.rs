// Row-Level Security Predicates
// Filter and block predicates inside an existing security policy

use serde::{Deserialize, Serialize};

use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateType {
    Filter,
    Block,
}

impl PredicateType {
    fn code(self) -> i64 {
        match self {
            PredicateType::Filter => 0,
            PredicateType::Block => 1,
        }
    }

    fn from_code(code: i64) -> ProviderResult<Self> {
        match code {
            0 => Ok(PredicateType::Filter),
            1 => Ok(PredicateType::Block),
            other => Err(ProviderError::QueryFailed(format!("unknown predicate type {}", other))),
        }
    }
}

/// Operation a block predicate applies to; absent means all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOperation {
    AfterInsert,
    AfterUpdate,
    BeforeUpdate,
    BeforeDelete,
}

impl BlockOperation {
    /// `sys.security_predicates.operation`
    fn code(self) -> i64 {
        match self {
            BlockOperation::AfterInsert => 1,
            BlockOperation::AfterUpdate => 2,
            BlockOperation::BeforeUpdate => 3,
            BlockOperation::BeforeDelete => 4,
        }
    }

    fn from_code(code: i64) -> ProviderResult<Self> {
        match code {
            1 => Ok(BlockOperation::AfterInsert),
            2 => Ok(BlockOperation::AfterUpdate),
            3 => Ok(BlockOperation::BeforeUpdate),
            4 => Ok(BlockOperation::BeforeDelete),
            other => Err(ProviderError::QueryFailed(format!("unknown block operation {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPredicate {
    pub id: ResourceId,
    pub connection_id: String,
    pub policy_object_id: i64,
    pub predicate_id: i64,
    pub target_object_id: i64,
    pub predicate_type: PredicateType,
    pub block_operation: Option<BlockOperation>,
    pub definition: String,
}

impl Snapshot for SecurityPredicate {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecurityPredicateInput {
    /// Security policy id
    pub policy: String,
    /// Table id the predicate protects
    pub table: String,
    pub predicate_type: PredicateType,
    pub block_operation: Option<BlockOperation>,
    /// Inline table-valued function call, e.g. `security.fn_tenant(tenant_id)`
    pub definition: String,
}

const SELECT_PREDICATE: &str = r#"
SELECT object_id, security_predicate_id, target_object_id, predicate_definition,
    predicate_type, operation
FROM sys.security_predicates"#;

const ADD_PREDICATE: &str = r#"
IF OBJECT_NAME(@policy) IS NULL
    THROW 50000, 'security policy does not exist', 1;
IF OBJECT_NAME(@target) IS NULL
    THROW 50000, 'target table does not exist', 1;
DECLARE @sql NVARCHAR(MAX) = N'ALTER SECURITY POLICY '
    + QUOTENAME(OBJECT_SCHEMA_NAME(@policy)) + N'.' + QUOTENAME(OBJECT_NAME(@policy))
    + N' ADD ' + IIF(@predicate_type = 0, N'FILTER', N'BLOCK') + N' PREDICATE ' + @definition
    + N' ON ' + QUOTENAME(OBJECT_SCHEMA_NAME(@target)) + N'.' + QUOTENAME(OBJECT_NAME(@target))
    + COALESCE(N' ' + CASE @operation
        WHEN 1 THEN N'AFTER INSERT'
        WHEN 2 THEN N'AFTER UPDATE'
        WHEN 3 THEN N'BEFORE UPDATE'
        WHEN 4 THEN N'BEFORE DELETE'
    END, N'');
IF @sql IS NULL
    THROW 50000, 'security predicate could not be built', 1;
EXEC (@sql);
"#;

const DROP_PREDICATE: &str = r#"
DECLARE @target_id INT, @kind TINYINT, @op TINYINT;
SELECT @target_id = target_object_id, @kind = predicate_type, @op = operation
FROM sys.security_predicates
WHERE object_id = @policy AND security_predicate_id = @predicate;
DECLARE @sql NVARCHAR(MAX) = N'ALTER SECURITY POLICY '
    + QUOTENAME(OBJECT_SCHEMA_NAME(@policy)) + N'.' + QUOTENAME(OBJECT_NAME(@policy))
    + N' DROP ' + IIF(@kind = 0, N'FILTER', N'BLOCK') + N' PREDICATE ON '
    + QUOTENAME(OBJECT_SCHEMA_NAME(@target_id)) + N'.' + QUOTENAME(OBJECT_NAME(@target_id))
    + COALESCE(N' ' + CASE @op
        WHEN 1 THEN N'AFTER INSERT'
        WHEN 2 THEN N'AFTER UPDATE'
        WHEN 3 THEN N'BEFORE UPDATE'
        WHEN 4 THEN N'BEFORE DELETE'
    END, N'');
IF @sql IS NULL
    THROW 50000, 'security predicate does not exist', 1;
EXEC (@sql);
"#;

impl Connection {
    fn security_predicate_from_record(&self, record: &Record) -> ProviderResult<SecurityPredicate> {
        let policy = record.get_i64("object_id")?;
        let predicate = record.get_i64("security_predicate_id")?;
        Ok(SecurityPredicate {
            id: self.resource_id(EntityKind::SecurityPredicate, &[policy, predicate])?,
            connection_id: self.connection_id().to_string(),
            policy_object_id: policy,
            predicate_id: predicate,
            target_object_id: record.get_i64("target_object_id")?,
            predicate_type: PredicateType::from_code(record.get_i64("predicate_type")?)?,
            block_operation: record
                .get_opt_i64("operation")?
                .map(BlockOperation::from_code)
                .transpose()?,
            definition: record.get_string("predicate_definition")?,
        })
    }

    pub async fn create_security_predicate(
        &self,
        input: &CreateSecurityPredicateInput,
    ) -> ProviderResult<SecurityPredicate> {
        self.require_database_scope()?;
        let policy = self.parse_id(EntityKind::SecurityPolicy, &input.policy)?;
        let table = self.parse_id(EntityKind::Table, &input.table)?;
        if input.predicate_type == PredicateType::Filter && input.block_operation.is_some() {
            return Err(ProviderError::InvalidInput(
                "a filter predicate cannot name a block operation".to_string(),
            ));
        }
        if input.definition.trim().is_empty() {
            return Err(ProviderError::InvalidInput("predicate definition must not be empty".to_string()));
        }

        let operation = input.block_operation.map(BlockOperation::code);
        let params = [
            Param::new("policy", policy.key()),
            Param::new("target", table.key()),
            Param::new("predicate_type", input.predicate_type.code()),
            Param::new("operation", operation),
            Param::new("definition", input.definition.as_str()),
        ];
        let name = format!("{:?} predicate on {}", input.predicate_type, input.table);
        create_then_verify(
            EntityKind::SecurityPredicate,
            &name,
            self.exec(ADD_PREDICATE, &params),
            || self.security_predicate_by_target(policy.key(), table.key(), input.predicate_type, operation),
        )
        .await
    }

    /// A policy holds at most one predicate per table, type and operation
    async fn security_predicate_by_target(
        &self,
        policy: i64,
        target: i64,
        predicate_type: PredicateType,
        operation: Option<i64>,
    ) -> ProviderResult<Option<SecurityPredicate>> {
        let sql = format!(
            "{} WHERE object_id = @policy AND target_object_id = @target AND predicate_type = @predicate_type \
             AND (operation = @operation OR (operation IS NULL AND @operation IS NULL))",
            SELECT_PREDICATE
        );
        let params = [
            Param::new("policy", policy),
            Param::new("target", target),
            Param::new("predicate_type", predicate_type.code()),
            Param::new("operation", operation),
        ];
        self.read_one(&sql, &params, |r| self.security_predicate_from_record(r))
            .await
    }

    pub async fn get_security_predicate_from_id(&self, id: &str) -> ProviderResult<Option<SecurityPredicate>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::SecurityPredicate, id)?;
        self.security_predicate_by_keys(id.keys()[0], id.keys()[1]).await
    }

    async fn security_predicate_by_keys(&self, policy: i64, predicate: i64) -> ProviderResult<Option<SecurityPredicate>> {
        let sql = format!(
            "{} WHERE object_id = @policy AND security_predicate_id = @predicate",
            SELECT_PREDICATE
        );
        let params = [Param::new("policy", policy), Param::new("predicate", predicate)];
        self.read_one(&sql, &params, |r| self.security_predicate_from_record(r))
            .await
    }

    pub async fn drop_security_predicate(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::SecurityPredicate, id)?;
        let (policy, predicate) = (id.keys()[0], id.keys()[1]);
        let params = [Param::new("policy", policy), Param::new("predicate", predicate)];
        delete_then_verify(
            EntityKind::SecurityPredicate,
            &id.to_string(),
            || self.security_predicate_by_keys(policy, predicate),
            || self.exec(DROP_PREDICATE, &params),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeDb;
    use crate::db::traits::CellValue;

    const CONN: &str = "sqlserver::s:1433:db";

    fn block_row() -> Record {
        Record::from_pairs(&[
            ("object_id", CellValue::Int(610)),
            ("security_predicate_id", CellValue::Int(2)),
            ("target_object_id", CellValue::Int(901)),
            ("predicate_definition", "([security].[fn_tenant]([tenant_id]))".into()),
            ("predicate_type", CellValue::Int(1)),
            ("operation", CellValue::Int(1)),
        ])
    }

    fn block_input() -> CreateSecurityPredicateInput {
        CreateSecurityPredicateInput {
            policy: "sqlserver::s:1433:db/securitypolicy/610".to_string(),
            table: "sqlserver::s:1433:db/table/901".to_string(),
            predicate_type: PredicateType::Block,
            block_operation: Some(BlockOperation::AfterInsert),
            definition: "security.fn_tenant(tenant_id)".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_block_predicate() {
        let db = FakeDb::new();
        db.on_query("sys.security_predicates", Some(block_row()));
        let conn = db.connection(CONN);

        let predicate = conn.create_security_predicate(&block_input()).await.unwrap();
        assert_eq!(predicate.id.to_string(), "sqlserver::s:1433:db/securitypredicate/610/2");
        assert_eq!(predicate.block_operation, Some(BlockOperation::AfterInsert));

        let params = db.params_of("ADD ' + IIF");
        assert_eq!(params[2], Param::new("predicate_type", 1i64));
        assert_eq!(params[3], Param::new("operation", 1i64));
    }

    #[tokio::test]
    async fn test_missing_policy_is_a_statement_failure() {
        assert!(ADD_PREDICATE.contains("IF OBJECT_NAME(@policy) IS NULL"));
        let db = FakeDb::new();
        db.on_exec_err("ALTER SECURITY POLICY", "security policy does not exist");
        let conn = db.connection(CONN);

        let err = conn.create_security_predicate(&block_input()).await.unwrap_err();
        assert!(matches!(err, ProviderError::QueryFailed(ref m) if m == "security policy does not exist"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_read_back_error_after_add_is_consistency_fault() {
        let db = FakeDb::new();
        db.on_exec("ALTER SECURITY POLICY", 0)
            .on_query_err("sys.security_predicates", "connection reset by peer");
        let conn = db.connection(CONN);

        let err = conn.create_security_predicate(&block_input()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ConsistencyFault(ref m) if m.contains("connection reset by peer")));
    }

    #[tokio::test]
    async fn test_add_and_read_back_both_failing_reports_the_add() {
        let db = FakeDb::new();
        db.on_exec_err("ALTER SECURITY POLICY", "permission denied")
            .on_query_err("sys.security_predicates", "connection reset by peer");
        let conn = db.connection(CONN);

        let err = conn.create_security_predicate(&block_input()).await.unwrap_err();
        assert!(matches!(err, ProviderError::QueryFailed(ref m) if m == "permission denied"));
    }

    #[tokio::test]
    async fn test_filter_predicate_with_operation_is_rejected() {
        let conn = FakeDb::new().connection(CONN);
        let input = CreateSecurityPredicateInput {
            predicate_type: PredicateType::Filter,
            ..block_input()
        };
        let err = conn.create_security_predicate(&input).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_filter_predicate_reads_null_operation() {
        let db = FakeDb::new();
        db.on_query(
            "security_predicate_id = @predicate",
            Some(Record::from_pairs(&[
                ("object_id", CellValue::Int(610)),
                ("security_predicate_id", CellValue::Int(1)),
                ("target_object_id", CellValue::Int(901)),
                ("predicate_definition", "([security].[fn_tenant]([tenant_id]))".into()),
                ("predicate_type", CellValue::Int(0)),
                ("operation", CellValue::Null),
            ])),
        );
        let conn = db.connection(CONN);

        let predicate = conn
            .get_security_predicate_from_id("sqlserver::s:1433:db/securitypredicate/610/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(predicate.predicate_type, PredicateType::Filter);
        assert_eq!(predicate.block_operation, None);
    }

    #[tokio::test]
    async fn test_drop_predicate() {
        let db = FakeDb::new();
        db.on_query_once("sys.security_predicates", Some(block_row()));
        let conn = db.connection(CONN);

        conn.drop_security_predicate("sqlserver::s:1433:db/securitypredicate/610/2")
            .await
            .unwrap();
        assert_eq!(
            db.params_of("PREDICATE ON"),
            vec![Param::new("policy", 610i64), Param::new("predicate", 2i64)]
        );
    }
}
