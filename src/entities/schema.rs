// Schemas
// CREATE / ALTER AUTHORIZATION / DROP SCHEMA, read back from sys.schemas

use serde::{Deserialize, Serialize};

use super::require_name;
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::ProviderResult;
use crate::reconcile::{create_then_verify, delete_then_verify, update_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: ResourceId,
    pub connection_id: String,
    pub name: String,
    pub schema_id: i64,
    pub owner_principal_id: i64,
}

impl Snapshot for Schema {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

/// Input for creating a schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSchemaInput {
    pub name: String,
    /// Role or user id of the owner; `dbo` when absent
    pub owner: Option<String>,
}

const SELECT_SCHEMA: &str = "SELECT schema_id, name, principal_id FROM sys.schemas";

const CREATE_SCHEMA: &str = r#"
IF @owner IS NOT NULL AND USER_NAME(@owner) IS NULL
    THROW 50000, 'owner principal does not exist', 1;
DECLARE @sql NVARCHAR(MAX) = N'CREATE SCHEMA ' + QUOTENAME(@name);
IF @owner IS NOT NULL
    SET @sql = @sql + N' AUTHORIZATION ' + QUOTENAME(USER_NAME(@owner));
EXEC (@sql);
"#;

const ALTER_SCHEMA_OWNER: &str = r#"
IF @owner IS NOT NULL AND USER_NAME(@owner) IS NULL
    THROW 50000, 'owner principal does not exist', 1;
DECLARE @sql NVARCHAR(MAX) = N'ALTER AUTHORIZATION ON SCHEMA::' + QUOTENAME(SCHEMA_NAME(@schema_id))
    + N' TO ' + QUOTENAME(COALESCE(USER_NAME(@owner), N'dbo'));
IF @sql IS NULL
    THROW 50000, 'schema does not exist', 1;
EXEC (@sql);
"#;

const DROP_SCHEMA: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP SCHEMA ' + QUOTENAME(SCHEMA_NAME(@schema_id));
IF @sql IS NULL
    THROW 50000, 'schema does not exist', 1;
EXEC (@sql);
"#;

impl Connection {
    fn schema_from_record(&self, record: &Record) -> ProviderResult<Schema> {
        let schema_id = record.get_i64("schema_id")?;
        Ok(Schema {
            id: self.resource_id(EntityKind::Schema, &[schema_id])?,
            connection_id: self.connection_id().to_string(),
            name: record.get_string("name")?,
            schema_id,
            owner_principal_id: record.get_i64("principal_id")?,
        })
    }

    fn owner_key(&self, owner: Option<&str>) -> ProviderResult<Option<i64>> {
        owner
            .map(|raw| self.parse_principal_id(raw).map(|id| id.key()))
            .transpose()
    }

    pub async fn create_schema(&self, input: &CreateSchemaInput) -> ProviderResult<Schema> {
        self.require_database_scope()?;
        require_name(EntityKind::Schema, &input.name)?;
        let owner = self.owner_key(input.owner.as_deref())?;

        let params = [Param::new("name", input.name.as_str()), Param::new("owner", owner)];
        create_then_verify(
            EntityKind::Schema,
            &input.name,
            self.exec(CREATE_SCHEMA, &params),
            || self.get_schema_from_name(&input.name),
        )
        .await
    }

    pub async fn get_schema_from_name(&self, name: &str) -> ProviderResult<Option<Schema>> {
        self.require_database_scope()?;
        let sql = format!("{} WHERE name = @name", SELECT_SCHEMA);
        self.read_one(&sql, &[Param::new("name", name)], |r| self.schema_from_record(r))
            .await
    }

    pub async fn get_schema_from_id(&self, id: &str) -> ProviderResult<Option<Schema>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Schema, id)?;
        self.schema_by_key(id.key()).await
    }

    async fn schema_by_key(&self, schema_id: i64) -> ProviderResult<Option<Schema>> {
        let sql = format!("{} WHERE schema_id = @schema_id", SELECT_SCHEMA);
        self.read_one(&sql, &[Param::new("schema_id", schema_id)], |r| {
            self.schema_from_record(r)
        })
        .await
    }

    /// Transfer ownership; `None` hands the schema back to `dbo`
    pub async fn update_schema_owner(&self, id: &str, owner: Option<&str>) -> ProviderResult<Schema> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Schema, id)?;
        let owner = self.owner_key(owner)?;

        let params = [Param::new("schema_id", id.key()), Param::new("owner", owner)];
        update_then_verify(
            EntityKind::Schema,
            &id,
            self.exec(ALTER_SCHEMA_OWNER, &params),
            || self.schema_by_key(id.key()),
        )
        .await
    }

    pub async fn drop_schema(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Schema, id)?;
        let params = [Param::new("schema_id", id.key())];
        delete_then_verify(
            EntityKind::Schema,
            &id.to_string(),
            || self.schema_by_key(id.key()),
            || self.exec(DROP_SCHEMA, &params),
        )
        .await
    }
}
