// SQL Modules
// Views, functions and procedures share one repository keyed by ModuleKind

use serde::{Deserialize, Serialize};

use super::require_name;
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, update_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    View,
    Function,
    Procedure,
}

impl ModuleKind {
    pub fn entity_kind(self) -> EntityKind {
        match self {
            ModuleKind::View => EntityKind::View,
            ModuleKind::Function => EntityKind::Function,
            ModuleKind::Procedure => EntityKind::Procedure,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            ModuleKind::View => "VIEW",
            ModuleKind::Function => "FUNCTION",
            ModuleKind::Procedure => "PROCEDURE",
        }
    }

    /// `sys.objects.type` codes
    fn object_types(self) -> &'static str {
        match self {
            ModuleKind::View => "'V'",
            ModuleKind::Function => "'FN', 'IF', 'TF'",
            ModuleKind::Procedure => "'P'",
        }
    }
}

/// A view, function or procedure with its catalog definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlModule {
    pub id: ResourceId,
    pub connection_id: String,
    pub kind: ModuleKind,
    pub schema: String,
    pub name: String,
    pub object_id: i64,
    /// Full text from `sys.sql_modules`, header included
    pub definition: String,
}

impl Snapshot for SqlModule {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModuleInput {
    pub schema: String,
    pub name: String,
    /// Everything after the qualified name, e.g. `AS SELECT 1 AS x` for a view
    /// or `(@n INT) RETURNS INT AS BEGIN RETURN @n END` for a function
    pub body: String,
}

fn select_module(kind: ModuleKind) -> String {
    format!(
        r#"
SELECT o.object_id, SCHEMA_NAME(o.schema_id) AS schema_name, o.name, m.definition
FROM sys.objects o
JOIN sys.sql_modules m ON m.object_id = o.object_id
WHERE o.type IN ({})"#,
        kind.object_types()
    )
}

fn define_module(verb: &str, kind: ModuleKind) -> String {
    format!(
        r#"
DECLARE @sql NVARCHAR(MAX) = N'{} {} ' + QUOTENAME(@schema) + N'.' + QUOTENAME(@name) + N' ' + @body;
EXEC (@sql);
"#,
        verb,
        kind.keyword()
    )
}

fn drop_module(kind: ModuleKind) -> String {
    format!(
        r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP {} ' + QUOTENAME(OBJECT_SCHEMA_NAME(@object_id)) + N'.' + QUOTENAME(OBJECT_NAME(@object_id));
IF @sql IS NULL
    THROW 50000, '{} does not exist', 1;
EXEC (@sql);
"#,
        kind.keyword(),
        kind.entity_kind()
    )
}

fn require_body(body: &str) -> ProviderResult<()> {
    if body.trim().is_empty() {
        return Err(ProviderError::InvalidInput("module body must not be empty".to_string()));
    }
    Ok(())
}

impl Connection {
    fn module_from_record(&self, kind: ModuleKind, record: &Record) -> ProviderResult<SqlModule> {
        let object_id = record.get_i64("object_id")?;
        Ok(SqlModule {
            id: self.resource_id(kind.entity_kind(), &[object_id])?,
            connection_id: self.connection_id().to_string(),
            kind,
            schema: record.get_string("schema_name")?,
            name: record.get_string("name")?,
            object_id,
            definition: record.get_string("definition")?,
        })
    }

    pub async fn create_module(&self, kind: ModuleKind, input: &CreateModuleInput) -> ProviderResult<SqlModule> {
        self.require_database_scope()?;
        require_name(EntityKind::Schema, &input.schema)?;
        require_name(kind.entity_kind(), &input.name)?;
        require_body(&input.body)?;

        let sql = define_module("CREATE", kind);
        let params = [
            Param::new("schema", input.schema.as_str()),
            Param::new("name", input.name.as_str()),
            Param::new("body", input.body.as_str()),
        ];
        let name = format!("{}.{}", input.schema, input.name);
        create_then_verify(
            kind.entity_kind(),
            &name,
            self.exec(&sql, &params),
            || self.get_module_from_name(kind, &input.schema, &input.name),
        )
        .await
    }

    pub async fn get_module_from_name(
        &self,
        kind: ModuleKind,
        schema: &str,
        name: &str,
    ) -> ProviderResult<Option<SqlModule>> {
        self.require_database_scope()?;
        let sql = format!(
            "{} AND o.schema_id = SCHEMA_ID(@schema) AND o.name = @name",
            select_module(kind)
        );
        let params = [Param::new("schema", schema), Param::new("name", name)];
        self.read_one(&sql, &params, |r| self.module_from_record(kind, r))
            .await
    }

    pub async fn get_module_from_id(&self, kind: ModuleKind, id: &str) -> ProviderResult<Option<SqlModule>> {
        self.require_database_scope()?;
        let id = self.parse_id(kind.entity_kind(), id)?;
        self.module_by_key(kind, id.key()).await
    }

    async fn module_by_key(&self, kind: ModuleKind, object_id: i64) -> ProviderResult<Option<SqlModule>> {
        let sql = format!("{} AND o.object_id = @object_id", select_module(kind));
        self.read_one(&sql, &[Param::new("object_id", object_id)], |r| {
            self.module_from_record(kind, r)
        })
        .await
    }

    /// Replace the definition in place with ALTER, keeping the object id and grants
    pub async fn update_module(&self, kind: ModuleKind, id: &str, body: &str) -> ProviderResult<SqlModule> {
        self.require_database_scope()?;
        let id = self.parse_id(kind.entity_kind(), id)?;
        require_body(body)?;
        let current = self
            .module_by_key(kind, id.key())
            .await?
            .ok_or_else(|| ProviderError::NotFound {
                kind: kind.entity_kind().label(),
                key: id.to_string(),
            })?;

        let sql = define_module("ALTER", kind);
        let params = [
            Param::new("schema", current.schema.as_str()),
            Param::new("name", current.name.as_str()),
            Param::new("body", body),
        ];
        update_then_verify(kind.entity_kind(), &id, self.exec(&sql, &params), || {
            self.module_by_key(kind, id.key())
        })
        .await
    }

    pub async fn drop_module(&self, kind: ModuleKind, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(kind.entity_kind(), id)?;
        let sql = drop_module(kind);
        let params = [Param::new("object_id", id.key())];
        delete_then_verify(
            kind.entity_kind(),
            &id.to_string(),
            || self.module_by_key(kind, id.key()),
            || self.exec(&sql, &params),
        )
        .await
    }
}
