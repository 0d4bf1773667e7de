// Tables
// Column lists travel as JSON and are expanded server-side with OPENJSON

use serde::{Deserialize, Serialize};

use super::require_name;
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

/// Column as read back from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    /// Type with its length or precision, e.g. `nvarchar(50)` or `decimal(18,2)`
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumnInput {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: ResourceId,
    pub connection_id: String,
    pub schema: String,
    pub name: String,
    pub object_id: i64,
    pub columns: Vec<TableColumn>,
}

impl Snapshot for Table {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTableInput {
    pub schema: String,
    pub name: String,
    pub columns: Vec<TableColumnInput>,
}

const SELECT_TABLE: &str = r#"
SELECT o.object_id, SCHEMA_NAME(o.schema_id) AS schema_name, o.name,
    (SELECT c.name,
        TYPE_NAME(c.user_type_id) + CASE
            WHEN TYPE_NAME(c.user_type_id) IN ('varchar', 'char', 'varbinary', 'binary')
                THEN '(' + IIF(c.max_length = -1, 'max', CAST(c.max_length AS VARCHAR(10))) + ')'
            WHEN TYPE_NAME(c.user_type_id) IN ('nvarchar', 'nchar')
                THEN '(' + IIF(c.max_length = -1, 'max', CAST(c.max_length / 2 AS VARCHAR(10))) + ')'
            WHEN TYPE_NAME(c.user_type_id) IN ('decimal', 'numeric')
                THEN '(' + CAST(c.precision AS VARCHAR(10)) + ',' + CAST(c.scale AS VARCHAR(10)) + ')'
            ELSE '' END AS [type],
        c.is_nullable AS nullable
     FROM sys.columns c
     WHERE c.object_id = o.object_id
     ORDER BY c.column_id
     FOR JSON PATH) AS columns
FROM sys.objects o
WHERE o.type = 'U'"#;

const CREATE_TABLE: &str = r#"
DECLARE @cols NVARCHAR(MAX) = (
    SELECT STRING_AGG(CAST(QUOTENAME(c.name) + N' ' + c.[type]
        + CASE WHEN c.nullable = 1 THEN N' NULL' ELSE N' NOT NULL' END AS NVARCHAR(MAX)), N', ')
        WITHIN GROUP (ORDER BY c.ordinal)
    FROM OPENJSON(@columns) WITH (name NVARCHAR(128), [type] NVARCHAR(128), nullable BIT, ordinal INT) c);
DECLARE @sql NVARCHAR(MAX) = N'CREATE TABLE ' + QUOTENAME(@schema) + N'.' + QUOTENAME(@name) + N' (' + @cols + N')';
EXEC (@sql);
"#;

const DROP_TABLE: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP TABLE ' + QUOTENAME(OBJECT_SCHEMA_NAME(@object_id)) + N'.' + QUOTENAME(OBJECT_NAME(@object_id));
IF @sql IS NULL
    THROW 50000, 'table does not exist', 1;
EXEC (@sql);
"#;

/// Accepts a type name with an optional `(n)`, `(max)` or `(p,s)` suffix
fn validate_type_name(type_name: &str) -> ProviderResult<()> {
    let invalid = || ProviderError::InvalidInput(format!("invalid column type '{}'", type_name));
    let (base, args) = match type_name.split_once('(') {
        Some((base, rest)) => (base.trim_end(), Some(rest.strip_suffix(')').ok_or_else(invalid)?)),
        None => (type_name, None),
    };
    if base.is_empty() || !base.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }
    if let Some(args) = args {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        let valid = parts.len() <= 2
            && parts.iter().all(|p| {
                p.eq_ignore_ascii_case("max") || (!p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            });
        if !valid {
            return Err(invalid());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ColumnSpec<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    type_name: &'a str,
    nullable: bool,
    ordinal: usize,
}

fn columns_json(columns: &[TableColumnInput]) -> ProviderResult<String> {
    if columns.is_empty() {
        return Err(ProviderError::InvalidInput("a table needs at least one column".to_string()));
    }
    let specs = columns
        .iter()
        .enumerate()
        .map(|(ordinal, column)| {
            require_name(EntityKind::Table, &column.name)?;
            validate_type_name(&column.type_name)?;
            Ok(ColumnSpec {
                name: &column.name,
                type_name: &column.type_name,
                nullable: column.nullable,
                ordinal,
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;
    serde_json::to_string(&specs).map_err(|e| ProviderError::InvalidInput(e.to_string()))
}

impl Connection {
    fn table_from_record(&self, record: &Record) -> ProviderResult<Table> {
        let object_id = record.get_i64("object_id")?;
        let columns = match record.get_opt_string("columns")? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| ProviderError::QueryFailed(format!("unreadable column list: {}", e)))?,
            None => Vec::new(),
        };
        Ok(Table {
            id: self.resource_id(EntityKind::Table, &[object_id])?,
            connection_id: self.connection_id().to_string(),
            schema: record.get_string("schema_name")?,
            name: record.get_string("name")?,
            object_id,
            columns,
        })
    }

    pub async fn create_table(&self, input: &CreateTableInput) -> ProviderResult<Table> {
        self.require_database_scope()?;
        require_name(EntityKind::Schema, &input.schema)?;
        require_name(EntityKind::Table, &input.name)?;
        let columns = columns_json(&input.columns)?;

        let params = [
            Param::new("schema", input.schema.as_str()),
            Param::new("name", input.name.as_str()),
            Param::new("columns", columns),
        ];
        let name = format!("{}.{}", input.schema, input.name);
        create_then_verify(
            EntityKind::Table,
            &name,
            self.exec(CREATE_TABLE, &params),
            || self.get_table_from_name(&input.schema, &input.name),
        )
        .await
    }

    pub async fn get_table_from_name(&self, schema: &str, name: &str) -> ProviderResult<Option<Table>> {
        self.require_database_scope()?;
        let sql = format!("{} AND o.schema_id = SCHEMA_ID(@schema) AND o.name = @name", SELECT_TABLE);
        let params = [Param::new("schema", schema), Param::new("name", name)];
        self.read_one(&sql, &params, |r| self.table_from_record(r)).await
    }

    pub async fn get_table_from_id(&self, id: &str) -> ProviderResult<Option<Table>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Table, id)?;
        self.table_by_key(id.key()).await
    }

    async fn table_by_key(&self, object_id: i64) -> ProviderResult<Option<Table>> {
        let sql = format!("{} AND o.object_id = @object_id", SELECT_TABLE);
        self.read_one(&sql, &[Param::new("object_id", object_id)], |r| {
            self.table_from_record(r)
        })
        .await
    }

    pub async fn drop_table(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Table, id)?;
        let params = [Param::new("object_id", id.key())];
        delete_then_verify(
            EntityKind::Table,
            &id.to_string(),
            || self.table_by_key(id.key()),
            || self.exec(DROP_TABLE, &params),
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

    fn orders_row() -> Record {
        Record::from_pairs(&[
            ("object_id", CellValue::Int(901)),
            ("schema_name", "sales".into()),
            ("name", "orders".into()),
            (
                "columns",
                r#"[{"name":"id","type":"bigint","nullable":false},{"name":"note","type":"nvarchar(200)","nullable":true}]"#
                    .into(),
            ),
        ])
    }

    fn orders_input() -> CreateTableInput {
        CreateTableInput {
            schema: "sales".to_string(),
            name: "orders".to_string(),
            columns: vec![
                TableColumnInput {
                    name: "id".to_string(),
                    type_name: "bigint".to_string(),
                    nullable: false,
                },
                TableColumnInput {
                    name: "note".to_string(),
                    type_name: "nvarchar(200)".to_string(),
                    nullable: true,
                },
            ],
        }
    }

    #[test]
    fn test_validate_type_name() {
        for ok in ["int", "nvarchar(50)", "varchar(max)", "decimal(18, 2)", "datetime2(7)"] {
            assert!(validate_type_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "int)", "nvarchar(50", "int; DROP TABLE x", "decimal(1,2,3)", "varchar()"] {
            assert!(validate_type_name(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_columns_json_keeps_order() {
        let json = columns_json(&orders_input().columns).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["name"], "id");
        assert_eq!(parsed[1]["ordinal"], 1);
        assert_eq!(parsed[1]["type"], "nvarchar(200)");
        assert!(columns_json(&[]).is_err());
    }

    #[tokio::test]
    async fn test_create_table() {
        let db = FakeDb::new();
        db.on_query("sys.objects", Some(orders_row()));
        let conn = db.connection(CONN);

        let table = conn.create_table(&orders_input()).await.unwrap();
        assert_eq!(table.id.to_string(), "sqlserver::s:1433:db/table/901");
        assert_eq!(table.columns.len(), 2);
        assert!(!table.columns[0].nullable);
        assert_eq!(table.columns[1].type_name, "nvarchar(200)");
        assert!(db.executed("OPENJSON(@columns)"));
    }

    #[test]
    fn test_table_default_nullable() {
        let column: TableColumnInput = serde_json::from_str(r#"{"name":"c","type":"int"}"#).unwrap();
        assert!(column.nullable);
    }

    #[tokio::test]
    async fn test_table_read_without_columns() {
        let db = FakeDb::new();
        db.on_query(
            "o.object_id = @object_id",
            Some(Record::from_pairs(&[
                ("object_id", CellValue::Int(901)),
                ("schema_name", "sales".into()),
                ("name", "orders".into()),
                ("columns", CellValue::Null),
            ])),
        );
        let conn = db.connection(CONN);
        let table = conn
            .get_table_from_id("sqlserver::s:1433:db/table/901")
            .await
            .unwrap()
            .unwrap();
        assert!(table.columns.is_empty());
    }

    #[tokio::test]
    async fn test_drop_table() {
        let db = FakeDb::new();
        db.on_query_once("sys.objects", Some(orders_row()));
        let conn = db.connection(CONN);
        conn.drop_table("sqlserver::s:1433:db/table/901").await.unwrap();
        assert!(db.executed("DROP TABLE"));
    }
}
