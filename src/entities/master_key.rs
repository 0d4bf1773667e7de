// Database Master Key
// At most one per database; needed before database scoped credentials can hold secrets

use serde::{Deserialize, Serialize};

use super::sql_literal;
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterKey {
    pub id: ResourceId,
    pub connection_id: String,
    pub symmetric_key_id: i64,
    pub algorithm: String,
    pub key_length: i64,
}

impl Snapshot for MasterKey {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

const SELECT_MASTER_KEY: &str = r#"
SELECT symmetric_key_id, algorithm_desc, CAST(key_length AS BIGINT) AS key_length
FROM sys.symmetric_keys
WHERE name = N'##MS_DatabaseMasterKey##'"#;

fn create_master_key() -> String {
    format!(
        r#"
DECLARE @sql NVARCHAR(MAX) = N'CREATE MASTER KEY';
IF @password IS NOT NULL
    SET @sql = @sql + N' ENCRYPTION BY PASSWORD = ' + {};
EXEC (@sql);
"#,
        sql_literal("@password")
    )
}

const DROP_MASTER_KEY: &str = "DROP MASTER KEY;";

impl Connection {
    fn master_key_from_record(&self, record: &Record) -> ProviderResult<MasterKey> {
        let symmetric_key_id = record.get_i64("symmetric_key_id")?;
        Ok(MasterKey {
            id: self.resource_id(EntityKind::MasterKey, &[symmetric_key_id])?,
            connection_id: self.connection_id().to_string(),
            symmetric_key_id,
            algorithm: record.get_string("algorithm_desc")?,
            key_length: record.get_i64("key_length")?,
        })
    }

    /// Without a password the key is protected by the service master key only,
    /// which Azure SQL and Synapse allow
    pub async fn create_master_key(&self, password: Option<&str>) -> ProviderResult<MasterKey> {
        self.require_database_scope()?;
        if password.is_some_and(|p| p.is_empty()) {
            return Err(ProviderError::InvalidInput("master key password must not be empty".to_string()));
        }

        let sql = create_master_key();
        let params = [Param::new("password", password)];
        create_then_verify(
            EntityKind::MasterKey,
            "##MS_DatabaseMasterKey##",
            self.exec(&sql, &params),
            || self.get_master_key(),
        )
        .await
    }

    pub async fn get_master_key(&self) -> ProviderResult<Option<MasterKey>> {
        self.require_database_scope()?;
        self.read_one(SELECT_MASTER_KEY, &[], |r| self.master_key_from_record(r))
            .await
    }

    pub async fn get_master_key_from_id(&self, id: &str) -> ProviderResult<Option<MasterKey>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::MasterKey, id)?;
        self.master_key_by_key(id.key()).await
    }

    async fn master_key_by_key(&self, symmetric_key_id: i64) -> ProviderResult<Option<MasterKey>> {
        let sql = format!("{} AND symmetric_key_id = @symmetric_key_id", SELECT_MASTER_KEY);
        self.read_one(&sql, &[Param::new("symmetric_key_id", symmetric_key_id)], |r| {
            self.master_key_from_record(r)
        })
        .await
    }

    pub async fn drop_master_key(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::MasterKey, id)?;
        delete_then_verify(
            EntityKind::MasterKey,
            &id.to_string(),
            || self.master_key_by_key(id.key()),
            || self.exec(DROP_MASTER_KEY, &[]),
        )
        .await
    }
}
