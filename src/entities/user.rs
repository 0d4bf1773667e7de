// Database Users
// Contained users from Entra ID, users mapped to logins, and users without login

use serde::{Deserialize, Serialize};

use super::{normalize_object_id, require_name};
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

/// How a new user authenticates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserAuthentication {
    /// Entra ID principal. With an object id the SID is set directly and
    /// the name need not resolve in the directory.
    External { object_id: Option<String> },
    /// Mapped to an existing server login
    FromLogin { login: String },
    WithoutLogin,
}

impl UserAuthentication {
    fn mode(&self) -> &'static str {
        match self {
            UserAuthentication::External { object_id: None } => "external",
            UserAuthentication::External { object_id: Some(_) } => "sid",
            UserAuthentication::FromLogin { .. } => "login",
            UserAuthentication::WithoutLogin => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: ResourceId,
    pub connection_id: String,
    pub name: String,
    pub principal_id: i64,
    /// `SQL_USER`, `EXTERNAL_USER` or `EXTERNAL_GROUPS`
    pub user_type: String,
    pub default_schema: Option<String>,
    /// Entra ID object id, for external principals
    pub object_id: Option<String>,
}

impl Snapshot for User {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserInput {
    pub name: String,
    pub authentication: UserAuthentication,
    pub default_schema: Option<String>,
}

const SELECT_USER: &str = r#"
SELECT principal_id, name, type_desc AS user_type, default_schema_name AS default_schema,
    CASE WHEN type IN ('E', 'X')
        THEN LOWER(CONVERT(NVARCHAR(36), CAST(sid AS UNIQUEIDENTIFIER)))
    END AS object_id
FROM sys.database_principals
WHERE type IN ('S', 'E', 'X')"#;

const CREATE_USER: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'CREATE USER ' + QUOTENAME(@name);
DECLARE @with NVARCHAR(MAX) = NULL;
IF @mode = N'external'
    SET @sql = @sql + N' FROM EXTERNAL PROVIDER';
ELSE IF @mode = N'login'
    SET @sql = @sql + N' FOR LOGIN ' + QUOTENAME(@login);
ELSE IF @mode = N'none'
    SET @sql = @sql + N' WITHOUT LOGIN';
ELSE IF @mode = N'sid'
    SET @with = N'SID = ' + CONVERT(NVARCHAR(64), CAST(CAST(@object_id AS UNIQUEIDENTIFIER) AS VARBINARY(16)), 1) + N', TYPE = E';
IF @default_schema IS NOT NULL
    SET @with = COALESCE(@with + N', ', N'') + N'DEFAULT_SCHEMA = ' + QUOTENAME(@default_schema);
IF @with IS NOT NULL
    SET @sql = @sql + N' WITH ' + @with;
EXEC (@sql);
"#;

const DROP_USER: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP USER ' + QUOTENAME(USER_NAME(@principal_id));
IF @sql IS NULL
    THROW 50000, 'user does not exist', 1;
EXEC (@sql);
"#;

impl Connection {
    fn user_from_record(&self, record: &Record) -> ProviderResult<User> {
        let principal_id = record.get_i64("principal_id")?;
        Ok(User {
            id: self.resource_id(EntityKind::User, &[principal_id])?,
            connection_id: self.connection_id().to_string(),
            name: record.get_string("name")?,
            principal_id,
            user_type: record.get_string("user_type")?,
            default_schema: record.get_opt_string("default_schema")?,
            object_id: record.get_opt_string("object_id")?,
        })
    }

    pub async fn create_user(&self, input: &CreateUserInput) -> ProviderResult<User> {
        self.require_database_scope()?;
        require_name(EntityKind::User, &input.name)?;
        let (login, object_id) = match &input.authentication {
            UserAuthentication::FromLogin { login } => {
                require_name(EntityKind::Login, login)?;
                (Some(login.as_str()), None)
            }
            UserAuthentication::External { object_id: Some(object_id) } => {
                (None, Some(normalize_object_id(object_id)?))
            }
            _ => (None, None),
        };

        let params = [
            Param::new("name", input.name.as_str()),
            Param::new("mode", input.authentication.mode()),
            Param::new("login", login),
            Param::new("object_id", object_id.as_deref()),
            Param::new("default_schema", input.default_schema.as_deref()),
        ];
        create_then_verify(
            EntityKind::User,
            &input.name,
            self.exec(CREATE_USER, &params),
            || self.get_user_from_name(&input.name),
        )
        .await
    }

    pub async fn get_user_from_name(&self, name: &str) -> ProviderResult<Option<User>> {
        self.require_database_scope()?;
        let sql = format!("{} AND name = @name", SELECT_USER);
        self.read_one(&sql, &[Param::new("name", name)], |r| self.user_from_record(r))
            .await
    }

    pub async fn get_user_from_id(&self, id: &str) -> ProviderResult<Option<User>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::User, id)?;
        self.user_by_key(id.key()).await
    }

    async fn user_by_key(&self, principal_id: i64) -> ProviderResult<Option<User>> {
        let sql = format!("{} AND principal_id = @principal_id", SELECT_USER);
        self.read_one(&sql, &[Param::new("principal_id", principal_id)], |r| {
            self.user_from_record(r)
        })
        .await
    }

    pub async fn drop_user(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::User, id)?;
        let params = [Param::new("principal_id", id.key())];
        delete_then_verify(
            EntityKind::User,
            &id.to_string(),
            || self.user_by_key(id.key()),
            || self.exec(DROP_USER, &params),
        )
        .await
    }
}
