// Database Scoped Credentials
// Secrets are sent as parameters and never read back or logged

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{require_name, sql_literal};
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, update_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseScopedCredential {
    pub id: ResourceId,
    pub connection_id: String,
    pub name: String,
    pub credential_id: i64,
    pub identity: String,
}

impl Snapshot for DatabaseScopedCredential {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CreateDatabaseScopedCredentialInput {
    pub name: String,
    /// e.g. `Managed Identity` or `SHARED ACCESS SIGNATURE`
    pub identity: String,
    pub secret: Option<String>,
}

impl fmt::Debug for CreateDatabaseScopedCredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateDatabaseScopedCredentialInput")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// ALTER needs the identity even when only the secret changes
#[derive(Clone, Serialize, Deserialize)]
pub struct UpdateDatabaseScopedCredentialInput {
    pub identity: String,
    pub secret: Option<String>,
}

impl fmt::Debug for UpdateDatabaseScopedCredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateDatabaseScopedCredentialInput")
            .field("identity", &self.identity)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

const SELECT_CREDENTIAL: &str = r#"
SELECT credential_id, name, credential_identity
FROM sys.database_scoped_credentials"#;

fn credential_options() -> String {
    format!(
        "N' WITH IDENTITY = ' + {} + COALESCE(N', SECRET = ' + {}, N'')",
        sql_literal("@identity"),
        sql_literal("@secret")
    )
}

fn create_credential() -> String {
    format!(
        r#"
DECLARE @sql NVARCHAR(MAX) = N'CREATE DATABASE SCOPED CREDENTIAL ' + QUOTENAME(@name) + {};
EXEC (@sql);
"#,
        credential_options()
    )
}

fn alter_credential() -> String {
    format!(
        r#"
DECLARE @sql NVARCHAR(MAX) = N'ALTER DATABASE SCOPED CREDENTIAL '
    + QUOTENAME((SELECT name FROM sys.database_scoped_credentials WHERE credential_id = @credential_id)) + {};
IF @sql IS NULL
    THROW 50000, 'database scoped credential does not exist', 1;
EXEC (@sql);
"#,
        credential_options()
    )
}

const DROP_CREDENTIAL: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP DATABASE SCOPED CREDENTIAL '
    + QUOTENAME((SELECT name FROM sys.database_scoped_credentials WHERE credential_id = @credential_id));
IF @sql IS NULL
    THROW 50000, 'database scoped credential does not exist', 1;
EXEC (@sql);
"#;

fn require_identity(identity: &str) -> ProviderResult<()> {
    if identity.trim().is_empty() {
        return Err(ProviderError::InvalidInput("credential identity must not be empty".to_string()));
    }
    Ok(())
}

impl Connection {
    fn credential_from_record(&self, record: &Record) -> ProviderResult<DatabaseScopedCredential> {
        let credential_id = record.get_i64("credential_id")?;
        Ok(DatabaseScopedCredential {
            id: self.resource_id(EntityKind::DatabaseScopedCredential, &[credential_id])?,
            connection_id: self.connection_id().to_string(),
            name: record.get_string("name")?,
            credential_id,
            identity: record.get_string("credential_identity")?,
        })
    }

    pub async fn create_database_scoped_credential(
        &self,
        input: &CreateDatabaseScopedCredentialInput,
    ) -> ProviderResult<DatabaseScopedCredential> {
        self.require_database_scope()?;
        require_name(EntityKind::DatabaseScopedCredential, &input.name)?;
        require_identity(&input.identity)?;

        let sql = create_credential();
        let params = [
            Param::new("name", input.name.as_str()),
            Param::new("identity", input.identity.as_str()),
            Param::new("secret", input.secret.as_deref()),
        ];
        create_then_verify(
            EntityKind::DatabaseScopedCredential,
            &input.name,
            self.exec(&sql, &params),
            || self.get_database_scoped_credential_from_name(&input.name),
        )
        .await
    }

    pub async fn get_database_scoped_credential_from_name(
        &self,
        name: &str,
    ) -> ProviderResult<Option<DatabaseScopedCredential>> {
        self.require_database_scope()?;
        let sql = format!("{} WHERE name = @name", SELECT_CREDENTIAL);
        self.read_one(&sql, &[Param::new("name", name)], |r| self.credential_from_record(r))
            .await
    }

    pub async fn get_database_scoped_credential_from_id(
        &self,
        id: &str,
    ) -> ProviderResult<Option<DatabaseScopedCredential>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::DatabaseScopedCredential, id)?;
        self.credential_by_key(id.key()).await
    }

    async fn credential_by_key(&self, credential_id: i64) -> ProviderResult<Option<DatabaseScopedCredential>> {
        let sql = format!("{} WHERE credential_id = @credential_id", SELECT_CREDENTIAL);
        self.read_one(&sql, &[Param::new("credential_id", credential_id)], |r| {
            self.credential_from_record(r)
        })
        .await
    }

    pub async fn update_database_scoped_credential(
        &self,
        id: &str,
        input: &UpdateDatabaseScopedCredentialInput,
    ) -> ProviderResult<DatabaseScopedCredential> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::DatabaseScopedCredential, id)?;
        require_identity(&input.identity)?;

        let sql = alter_credential();
        let params = [
            Param::new("credential_id", id.key()),
            Param::new("identity", input.identity.as_str()),
            Param::new("secret", input.secret.as_deref()),
        ];
        update_then_verify(
            EntityKind::DatabaseScopedCredential,
            &id,
            self.exec(&sql, &params),
            || self.credential_by_key(id.key()),
        )
        .await
    }

    pub async fn drop_database_scoped_credential(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::DatabaseScopedCredential, id)?;
        let params = [Param::new("credential_id", id.key())];
        delete_then_verify(
            EntityKind::DatabaseScopedCredential,
            &id.to_string(),
            || self.credential_by_key(id.key()),
            || self.exec(DROP_CREDENTIAL, &params),
        )
        .await
    }
}
