// Databases
// Needs a server-scope connection; dropping a database forgets cached connections to it

use serde::{Deserialize, Serialize};

use super::{require_name, sql_literal};
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub id: ResourceId,
    pub connection_id: String,
    pub name: String,
    pub database_id: i64,
    pub collation: Option<String>,
    /// Pricing tier on Azure SQL, e.g. `S0` or `GP_S_Gen5_1`
    pub service_objective: Option<String>,
}

impl Snapshot for Database {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

const SELECT_DATABASE: &str = r#"
SELECT database_id, name, collation_name,
    CAST(DATABASEPROPERTYEX(name, 'ServiceObjective') AS NVARCHAR(128)) AS service_objective
FROM sys.databases"#;

fn create_database() -> String {
    format!(
        r#"
DECLARE @sql NVARCHAR(MAX) = N'CREATE DATABASE ' + QUOTENAME(@name);
IF @service_objective IS NOT NULL
    SET @sql = @sql + N' (SERVICE_OBJECTIVE = ' + {} + N')';
EXEC (@sql);
"#,
        sql_literal("@service_objective")
    )
}

const DROP_DATABASE: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP DATABASE ' + QUOTENAME(DB_NAME(@database_id));
IF @sql IS NULL
    THROW 50000, 'database does not exist', 1;
EXEC (@sql);
"#;

fn validate_service_objective(objective: &str) -> ProviderResult<()> {
    if objective.is_empty() || !objective.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ProviderError::InvalidInput(format!(
            "invalid service objective '{}'",
            objective
        )));
    }
    Ok(())
}

impl Connection {
    fn database_from_record(&self, record: &Record) -> ProviderResult<Database> {
        let database_id = record.get_i64("database_id")?;
        Ok(Database {
            id: self.resource_id(EntityKind::Database, &[database_id])?,
            connection_id: self.connection_id().to_string(),
            name: record.get_string("name")?,
            database_id,
            collation: record.get_opt_string("collation_name")?,
            service_objective: record.get_opt_string("service_objective")?,
        })
    }

    pub async fn create_database(&self, name: &str, service_objective: Option<&str>) -> ProviderResult<Database> {
        self.require_server_scope()?;
        require_name(EntityKind::Database, name)?;
        if let Some(objective) = service_objective {
            validate_service_objective(objective)?;
        }

        let sql = create_database();
        let params = [
            Param::new("name", name),
            Param::new("service_objective", service_objective),
        ];
        create_then_verify(
            EntityKind::Database,
            name,
            self.exec(&sql, &params),
            || self.get_database_from_name(name),
        )
        .await
    }

    pub async fn get_database_from_name(&self, name: &str) -> ProviderResult<Option<Database>> {
        self.require_server_scope()?;
        let sql = format!("{} WHERE name = @name", SELECT_DATABASE);
        self.read_one(&sql, &[Param::new("name", name)], |r| self.database_from_record(r))
            .await
    }

    pub async fn get_database_from_id(&self, id: &str) -> ProviderResult<Option<Database>> {
        self.require_server_scope()?;
        let id = self.parse_id(EntityKind::Database, id)?;
        self.database_by_key(id.key()).await
    }

    async fn database_by_key(&self, database_id: i64) -> ProviderResult<Option<Database>> {
        let sql = format!("{} WHERE database_id = @database_id", SELECT_DATABASE);
        self.read_one(&sql, &[Param::new("database_id", database_id)], |r| {
            self.database_from_record(r)
        })
        .await
    }

    pub async fn drop_database(&self, id: &str) -> ProviderResult<()> {
        self.require_server_scope()?;
        let id = self.parse_id(EntityKind::Database, id)?;
        let name = self.database_by_key(id.key()).await?.map(|db| db.name);

        let params = [Param::new("database_id", id.key())];
        let result = delete_then_verify(
            EntityKind::Database,
            &id.to_string(),
            || self.database_by_key(id.key()),
            || self.exec(DROP_DATABASE, &params),
        )
        .await;

        if let Some(name) = name {
            self.invalidate_database(&name).await;
        }
        result
    }
}
