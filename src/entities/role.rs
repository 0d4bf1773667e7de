// Database Roles
// CREATE / ALTER / DROP ROLE, read back from sys.database_principals

use serde::{Deserialize, Serialize};

use super::require_name;
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, update_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

/// A database role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: ResourceId,
    pub connection_id: String,
    pub name: String,
    pub principal_id: i64,
    pub owner_principal_id: i64,
}

impl Snapshot for Role {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRoleInput {
    pub name: String,
    /// Role or user id of the owner
    pub owner: Option<String>,
}

/// Rename and/or transfer ownership; unset fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRoleInput {
    pub name: Option<String>,
    pub owner: Option<String>,
}

const SELECT_ROLE: &str = r#"
SELECT principal_id, name, owning_principal_id
FROM sys.database_principals
WHERE type = 'R'"#;

const CREATE_ROLE: &str = r#"
IF @owner IS NOT NULL AND USER_NAME(@owner) IS NULL
    THROW 50000, 'owner principal does not exist', 1;
DECLARE @sql NVARCHAR(MAX) = N'CREATE ROLE ' + QUOTENAME(@name);
IF @owner IS NOT NULL
    SET @sql = @sql + N' AUTHORIZATION ' + QUOTENAME(USER_NAME(@owner));
EXEC (@sql);
"#;

const ALTER_ROLE: &str = r#"
DECLARE @current NVARCHAR(128) = USER_NAME(@principal_id);
IF @current IS NULL
    THROW 50000, 'role does not exist', 1;
IF @owner IS NOT NULL AND USER_NAME(@owner) IS NULL
    THROW 50000, 'owner principal does not exist', 1;
DECLARE @sql NVARCHAR(MAX);
IF @owner IS NOT NULL
BEGIN
    SET @sql = N'ALTER AUTHORIZATION ON ROLE::' + QUOTENAME(@current) + N' TO ' + QUOTENAME(USER_NAME(@owner));
    EXEC (@sql);
END
IF @name IS NOT NULL AND @name <> @current
BEGIN
    SET @sql = N'ALTER ROLE ' + QUOTENAME(@current) + N' WITH NAME = ' + QUOTENAME(@name);
    EXEC (@sql);
END
"#;

const DROP_ROLE: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP ROLE ' + QUOTENAME(USER_NAME(@principal_id));
IF @sql IS NULL
    THROW 50000, 'role does not exist', 1;
EXEC (@sql);
"#;

impl Connection {
    fn role_from_record(&self, record: &Record) -> ProviderResult<Role> {
        let principal_id = record.get_i64("principal_id")?;
        Ok(Role {
            id: self.resource_id(EntityKind::Role, &[principal_id])?,
            connection_id: self.connection_id().to_string(),
            name: record.get_string("name")?,
            principal_id,
            owner_principal_id: record.get_i64("owning_principal_id")?,
        })
    }

    pub async fn create_role(&self, input: &CreateRoleInput) -> ProviderResult<Role> {
        self.require_database_scope()?;
        require_name(EntityKind::Role, &input.name)?;
        let owner = input
            .owner
            .as_deref()
            .map(|raw| self.parse_principal_id(raw).map(|id| id.key()))
            .transpose()?;

        let params = [Param::new("name", input.name.as_str()), Param::new("owner", owner)];
        create_then_verify(
            EntityKind::Role,
            &input.name,
            self.exec(CREATE_ROLE, &params),
            || self.get_role_from_name(&input.name),
        )
        .await
    }

    pub async fn get_role_from_name(&self, name: &str) -> ProviderResult<Option<Role>> {
        self.require_database_scope()?;
        let sql = format!("{} AND name = @name", SELECT_ROLE);
        self.read_one(&sql, &[Param::new("name", name)], |r| self.role_from_record(r))
            .await
    }

    pub async fn get_role_from_id(&self, id: &str) -> ProviderResult<Option<Role>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Role, id)?;
        self.role_by_key(id.key()).await
    }

    async fn role_by_key(&self, principal_id: i64) -> ProviderResult<Option<Role>> {
        let sql = format!("{} AND principal_id = @principal_id", SELECT_ROLE);
        self.read_one(&sql, &[Param::new("principal_id", principal_id)], |r| {
            self.role_from_record(r)
        })
        .await
    }

    pub async fn update_role(&self, id: &str, input: &UpdateRoleInput) -> ProviderResult<Role> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Role, id)?;
        if let Some(name) = &input.name {
            require_name(EntityKind::Role, name)?;
        }
        let owner = input
            .owner
            .as_deref()
            .map(|raw| self.parse_principal_id(raw).map(|id| id.key()))
            .transpose()?;
        if input.name.is_none() && owner.is_none() {
            return Err(ProviderError::InvalidInput("role update changes nothing".to_string()));
        }

        let params = [
            Param::new("principal_id", id.key()),
            Param::new("name", input.name.as_deref()),
            Param::new("owner", owner),
        ];
        update_then_verify(
            EntityKind::Role,
            &id,
            self.exec(ALTER_ROLE, &params),
            || self.role_by_key(id.key()),
        )
        .await
    }

    pub async fn drop_role(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Role, id)?;
        let params = [Param::new("principal_id", id.key())];
        delete_then_verify(
            EntityKind::Role,
            &id.to_string(),
            || self.role_by_key(id.key()),
            || self.exec(DROP_ROLE, &params),
        )
        .await
    }
}
