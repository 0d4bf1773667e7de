// External Data Sources
// Locations for OPENROWSET / external tables, optionally bound to a database scoped credential

use serde::{Deserialize, Serialize};

use super::{require_name, sql_literal};
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, update_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDataSource {
    pub id: ResourceId,
    pub connection_id: String,
    pub name: String,
    pub data_source_id: i64,
    pub location: String,
    pub credential_id: Option<i64>,
}

impl Snapshot for ExternalDataSource {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExternalDataSourceInput {
    pub name: String,
    pub location: String,
    /// Database scoped credential id
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateExternalDataSourceInput {
    pub location: Option<String>,
    pub credential: Option<String>,
}

const SELECT_DATA_SOURCE: &str = r#"
SELECT data_source_id, name, location, NULLIF(credential_id, 0) AS credential_id
FROM sys.external_data_sources"#;

fn create_data_source() -> String {
    format!(
        r#"
IF @credential IS NOT NULL AND NOT EXISTS (SELECT 1 FROM sys.database_scoped_credentials WHERE credential_id = @credential)
    THROW 50000, 'credential does not exist', 1;
DECLARE @sql NVARCHAR(MAX) = N'CREATE EXTERNAL DATA SOURCE ' + QUOTENAME(@name)
    + N' WITH (LOCATION = ' + {}
    + COALESCE(N', CREDENTIAL = ' + QUOTENAME((SELECT name FROM sys.database_scoped_credentials WHERE credential_id = @credential)), N'')
    + N')';
EXEC (@sql);
"#,
        sql_literal("@location")
    )
}

fn alter_data_source() -> String {
    format!(
        r#"
IF @credential IS NOT NULL AND NOT EXISTS (SELECT 1 FROM sys.database_scoped_credentials WHERE credential_id = @credential)
    THROW 50000, 'credential does not exist', 1;
DECLARE @current NVARCHAR(128) = (SELECT name FROM sys.external_data_sources WHERE data_source_id = @data_source_id);
DECLARE @set NVARCHAR(MAX) = NULL;
IF @location IS NOT NULL
    SET @set = N'LOCATION = ' + {};
IF @credential IS NOT NULL
    SET @set = COALESCE(@set + N', ', N'') + N'CREDENTIAL = '
        + QUOTENAME((SELECT name FROM sys.database_scoped_credentials WHERE credential_id = @credential));
DECLARE @sql NVARCHAR(MAX) = N'ALTER EXTERNAL DATA SOURCE ' + QUOTENAME(@current) + N' SET ' + @set;
IF @sql IS NULL
    THROW 50000, 'external data source does not exist', 1;
EXEC (@sql);
"#,
        sql_literal("@location")
    )
}

const DROP_DATA_SOURCE: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP EXTERNAL DATA SOURCE '
    + QUOTENAME((SELECT name FROM sys.external_data_sources WHERE data_source_id = @data_source_id));
IF @sql IS NULL
    THROW 50000, 'external data source does not exist', 1;
EXEC (@sql);
"#;

fn require_location(location: &str) -> ProviderResult<()> {
    if location.trim().is_empty() || !location.contains("://") {
        return Err(ProviderError::InvalidInput(format!(
            "external data source location '{}' must be a URL",
            location
        )));
    }
    Ok(())
}

impl Connection {
    fn external_data_source_from_record(&self, record: &Record) -> ProviderResult<ExternalDataSource> {
        let data_source_id = record.get_i64("data_source_id")?;
        Ok(ExternalDataSource {
            id: self.resource_id(EntityKind::ExternalDataSource, &[data_source_id])?,
            connection_id: self.connection_id().to_string(),
            name: record.get_string("name")?,
            data_source_id,
            location: record.get_string("location")?,
            credential_id: record.get_opt_i64("credential_id")?,
        })
    }

    fn credential_key(&self, credential: Option<&str>) -> ProviderResult<Option<i64>> {
        credential
            .map(|raw| {
                self.parse_id(EntityKind::DatabaseScopedCredential, raw)
                    .map(|id| id.key())
            })
            .transpose()
    }

    pub async fn create_external_data_source(
        &self,
        input: &CreateExternalDataSourceInput,
    ) -> ProviderResult<ExternalDataSource> {
        self.require_database_scope()?;
        require_name(EntityKind::ExternalDataSource, &input.name)?;
        require_location(&input.location)?;
        let credential = self.credential_key(input.credential.as_deref())?;

        let sql = create_data_source();
        let params = [
            Param::new("name", input.name.as_str()),
            Param::new("location", input.location.as_str()),
            Param::new("credential", credential),
        ];
        create_then_verify(
            EntityKind::ExternalDataSource,
            &input.name,
            self.exec(&sql, &params),
            || self.get_external_data_source_from_name(&input.name),
        )
        .await
    }

    pub async fn get_external_data_source_from_name(&self, name: &str) -> ProviderResult<Option<ExternalDataSource>> {
        self.require_database_scope()?;
        let sql = format!("{} WHERE name = @name", SELECT_DATA_SOURCE);
        self.read_one(&sql, &[Param::new("name", name)], |r| {
            self.external_data_source_from_record(r)
        })
        .await
    }

    pub async fn get_external_data_source_from_id(&self, id: &str) -> ProviderResult<Option<ExternalDataSource>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::ExternalDataSource, id)?;
        self.external_data_source_by_key(id.key()).await
    }

    async fn external_data_source_by_key(&self, data_source_id: i64) -> ProviderResult<Option<ExternalDataSource>> {
        let sql = format!("{} WHERE data_source_id = @data_source_id", SELECT_DATA_SOURCE);
        self.read_one(&sql, &[Param::new("data_source_id", data_source_id)], |r| {
            self.external_data_source_from_record(r)
        })
        .await
    }

    pub async fn update_external_data_source(
        &self,
        id: &str,
        input: &UpdateExternalDataSourceInput,
    ) -> ProviderResult<ExternalDataSource> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::ExternalDataSource, id)?;
        if let Some(location) = &input.location {
            require_location(location)?;
        }
        let credential = self.credential_key(input.credential.as_deref())?;
        if input.location.is_none() && credential.is_none() {
            return Err(ProviderError::InvalidInput(
                "external data source update changes nothing".to_string(),
            ));
        }

        let sql = alter_data_source();
        let params = [
            Param::new("data_source_id", id.key()),
            Param::new("location", input.location.as_deref()),
            Param::new("credential", credential),
        ];
        update_then_verify(
            EntityKind::ExternalDataSource,
            &id,
            self.exec(&sql, &params),
            || self.external_data_source_by_key(id.key()),
        )
        .await
    }

    pub async fn drop_external_data_source(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::ExternalDataSource, id)?;
        let params = [Param::new("data_source_id", id.key())];
        delete_then_verify(
            EntityKind::ExternalDataSource,
            &id.to_string(),
            || self.external_data_source_by_key(id.key()),
            || self.exec(DROP_DATA_SOURCE, &params),
        )
        .await
    }
}
