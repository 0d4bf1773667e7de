// Server Logins
// Entra ID logins in master; needs a server-scope connection

use serde::{Deserialize, Serialize};

use super::{normalize_object_id, require_name};
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::ProviderResult;
use crate::reconcile::{create_then_verify, delete_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Login {
    pub id: ResourceId,
    pub connection_id: String,
    pub name: String,
    pub principal_id: i64,
    pub login_type: String,
    pub object_id: Option<String>,
    pub default_database: Option<String>,
    pub disabled: bool,
}

impl Snapshot for Login {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateLoginInput {
    pub name: String,
    /// Pin the login to an Entra ID object instead of resolving `name`
    pub object_id: Option<String>,
}

const SELECT_LOGIN: &str = r#"
SELECT principal_id, name, type_desc AS login_type, default_database_name AS default_database, is_disabled,
    CASE WHEN type IN ('E', 'X')
        THEN LOWER(CONVERT(NVARCHAR(36), CAST(sid AS UNIQUEIDENTIFIER)))
    END AS object_id
FROM sys.server_principals
WHERE type IN ('S', 'E', 'X')"#;

const CREATE_LOGIN: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'CREATE LOGIN ' + QUOTENAME(@name) + N' FROM EXTERNAL PROVIDER';
IF @object_id IS NOT NULL
    SET @sql = @sql + N' WITH OBJECT_ID = ''' + CONVERT(NVARCHAR(36), CAST(@object_id AS UNIQUEIDENTIFIER)) + N'''';
EXEC (@sql);
"#;

const DROP_LOGIN: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP LOGIN ' + QUOTENAME(SUSER_NAME(@principal_id));
IF @sql IS NULL
    THROW 50000, 'login does not exist', 1;
EXEC (@sql);
"#;

impl Connection {
    fn login_from_record(&self, record: &Record) -> ProviderResult<Login> {
        let principal_id = record.get_i64("principal_id")?;
        Ok(Login {
            id: self.resource_id(EntityKind::Login, &[principal_id])?,
            connection_id: self.connection_id().to_string(),
            name: record.get_string("name")?,
            principal_id,
            login_type: record.get_string("login_type")?,
            object_id: record.get_opt_string("object_id")?,
            default_database: record.get_opt_string("default_database")?,
            disabled: record.get_bool("is_disabled")?,
        })
    }

    pub async fn create_login(&self, input: &CreateLoginInput) -> ProviderResult<Login> {
        self.require_server_scope()?;
        require_name(EntityKind::Login, &input.name)?;
        let object_id = input.object_id.as_deref().map(normalize_object_id).transpose()?;

        let params = [
            Param::new("name", input.name.as_str()),
            Param::new("object_id", object_id),
        ];
        create_then_verify(
            EntityKind::Login,
            &input.name,
            self.exec(CREATE_LOGIN, &params),
            || self.get_login_from_name(&input.name),
        )
        .await
    }

    pub async fn get_login_from_name(&self, name: &str) -> ProviderResult<Option<Login>> {
        self.require_server_scope()?;
        let sql = format!("{} AND name = @name", SELECT_LOGIN);
        self.read_one(&sql, &[Param::new("name", name)], |r| self.login_from_record(r))
            .await
    }

    pub async fn get_login_from_id(&self, id: &str) -> ProviderResult<Option<Login>> {
        self.require_server_scope()?;
        let id = self.parse_id(EntityKind::Login, id)?;
        self.login_by_key(id.key()).await
    }

    async fn login_by_key(&self, principal_id: i64) -> ProviderResult<Option<Login>> {
        let sql = format!("{} AND principal_id = @principal_id", SELECT_LOGIN);
        self.read_one(&sql, &[Param::new("principal_id", principal_id)], |r| {
            self.login_from_record(r)
        })
        .await
    }

    pub async fn drop_login(&self, id: &str) -> ProviderResult<()> {
        self.require_server_scope()?;
        let id = self.parse_id(EntityKind::Login, id)?;
        let params = [Param::new("principal_id", id.key())];
        delete_then_verify(
            EntityKind::Login,
            &id.to_string(),
            || self.login_by_key(id.key()),
            || self.exec(DROP_LOGIN, &params),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeDb;
    use crate::db::traits::CellValue;
    use crate::error::ProviderError;

    const CONN: &str = "sqlserver::s:1433";

    fn login_row() -> Record {
        Record::from_pairs(&[
            ("principal_id", CellValue::Int(270)),
            ("name", "ops@contoso.com".into()),
            ("login_type", "EXTERNAL_LOGIN".into()),
            ("default_database", "master".into()),
            ("is_disabled", CellValue::Bool(false)),
            ("object_id", "6b1f0a8e-3c44-4d1e-9b5a-2f7c1d9e0a11".into()),
        ])
    }

    #[tokio::test]
    async fn test_create_login() {
        let db = FakeDb::new();
        db.on_query("sys.server_principals", Some(login_row()));
        let conn = db.connection(CONN);

        let login = conn
            .create_login(&CreateLoginInput {
                name: "ops@contoso.com".to_string(),
                object_id: None,
            })
            .await
            .unwrap();
        assert_eq!(login.id.to_string(), "sqlserver::s:1433/login/270");
        assert!(!login.disabled);
        assert!(db.executed("FROM EXTERNAL PROVIDER"));
    }

    #[tokio::test]
    async fn test_create_login_with_urn_object_id() {
        let db = FakeDb::new();
        db.on_query("sys.server_principals", Some(login_row()));
        let conn = db.connection(CONN);

        conn.create_login(&CreateLoginInput {
            name: "ops@contoso.com".to_string(),
            object_id: Some("urn:uuid:6B1F0A8E-3C44-4D1E-9B5A-2F7C1D9E0A11".to_string()),
        })
        .await
        .unwrap();
        assert_eq!(
            db.params_of("CREATE LOGIN")[1],
            Param::new("object_id", "6b1f0a8e-3c44-4d1e-9b5a-2f7c1d9e0a11")
        );
    }

    #[tokio::test]
    async fn test_login_needs_server_scope() {
        let db = FakeDb::new();
        let conn = db.connection("sqlserver::s:1433:db");
        let err = conn
            .create_login(&CreateLoginInput {
                name: "ops".to_string(),
                object_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected a server connection but received a database connection: 'sqlserver::s:1433:db'"
        );
        assert!(db.statements().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_login() {
        let db = FakeDb::new();
        db.on_exec_err("CREATE LOGIN", "The server principal 'ops@contoso.com' already exists.")
            .on_query("sys.server_principals", Some(login_row()));
        let conn = db.connection(CONN);

        let err = conn
            .create_login(&CreateLoginInput {
                name: "ops@contoso.com".to_string(),
                object_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists { ref id, .. } if id == "sqlserver::s:1433/login/270"));
    }

    #[tokio::test]
    async fn test_drop_login() {
        let db = FakeDb::new();
        db.on_query_once("sys.server_principals", Some(login_row()));
        let conn = db.connection(CONN);
        conn.drop_login("sqlserver::s:1433/login/270").await.unwrap();
        assert!(db.executed("DROP LOGIN"));
    }
}
