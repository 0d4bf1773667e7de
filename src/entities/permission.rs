// Permissions
// GRANT / REVOKE on a database, schema or object to one principal

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::reconcile::{create_then_verify, delete_then_verify, update_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

/// Securable a permission applies to, in `sys.database_permissions` terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionScope {
    Database,
    Schema { schema_id: i64 },
    Object { object_id: i64 },
}

impl PermissionScope {
    pub fn class(self) -> i64 {
        match self {
            PermissionScope::Database => 0,
            PermissionScope::Object { .. } => 1,
            PermissionScope::Schema { .. } => 3,
        }
    }

    pub fn major_id(self) -> i64 {
        match self {
            PermissionScope::Database => 0,
            PermissionScope::Schema { schema_id } => schema_id,
            PermissionScope::Object { object_id } => object_id,
        }
    }

    fn from_keys(raw: &str, class: i64, major_id: i64) -> ProviderResult<Self> {
        match (class, major_id) {
            (0, 0) => Ok(PermissionScope::Database),
            (1, object_id) => Ok(PermissionScope::Object { object_id }),
            (3, schema_id) => Ok(PermissionScope::Schema { schema_id }),
            _ => Err(ProviderError::id_format(
                raw,
                format!("unsupported permission class {} with major id {}", class, major_id),
            )),
        }
    }
}

const OBJECT_KINDS: [EntityKind; 4] = [
    EntityKind::Table,
    EntityKind::View,
    EntityKind::Function,
    EntityKind::Procedure,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: ResourceId,
    pub connection_id: String,
    pub scope: PermissionScope,
    pub principal_id: i64,
    /// Granted permission names, sorted
    pub permissions: Vec<String>,
}

impl Snapshot for Permission {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermissionInput {
    /// The database connection id itself, or a schema, table, view, function or procedure id
    pub scope: String,
    /// Role or user id of the grantee
    pub principal: String,
    pub permissions: Vec<String>,
}

const SELECT_PERMISSION: &str = r#"
SELECT @class AS class, @major_id AS major_id, @grantee AS grantee_principal_id,
    STRING_AGG(CAST(permission_name AS NVARCHAR(MAX)), N',') WITHIN GROUP (ORDER BY permission_name) AS permissions
FROM sys.database_permissions
WHERE class = @class AND major_id = @major_id AND minor_id = 0
    AND grantee_principal_id = @grantee AND state IN ('G', 'W')
HAVING COUNT(*) > 0"#;

const SECURABLE: &str = r#"
DECLARE @target NVARCHAR(MAX) = CASE @class
    WHEN 0 THEN N'DATABASE::' + QUOTENAME(DB_NAME())
    WHEN 3 THEN N'SCHEMA::' + QUOTENAME(SCHEMA_NAME(@major_id))
    WHEN 1 THEN N'OBJECT::' + QUOTENAME(OBJECT_SCHEMA_NAME(@major_id)) + N'.' + QUOTENAME(OBJECT_NAME(@major_id))
END;
IF @target IS NULL
    THROW 50000, 'permission scope does not exist', 1;
IF USER_NAME(@grantee) IS NULL
    THROW 50000, 'grantee principal does not exist', 1;
"#;

const GRANT: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'GRANT ' + @permissions + N' ON ' + @target + N' TO ' + QUOTENAME(USER_NAME(@grantee));
EXEC (@sql);
"#;

const REVOKE: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'REVOKE ' + @permissions + N' ON ' + @target + N' FROM ' + QUOTENAME(USER_NAME(@grantee));
EXEC (@sql);
"#;

const REVOKE_ALL: &str = r#"
DECLARE @granted NVARCHAR(MAX) = (
    SELECT STRING_AGG(CAST(permission_name AS NVARCHAR(MAX)), N', ')
    FROM sys.database_permissions
    WHERE class = @class AND major_id = @major_id AND minor_id = 0
        AND grantee_principal_id = @grantee AND state IN ('G', 'W'));
IF @granted IS NOT NULL
BEGIN
    DECLARE @sql NVARCHAR(MAX) = N'REVOKE ' + @granted + N' ON ' + @target + N' FROM ' + QUOTENAME(USER_NAME(@grantee));
    EXEC (@sql);
END
"#;

/// Upper-case, collapse whitespace, dedupe and sort permission names
fn normalize_permissions(permissions: &[String]) -> ProviderResult<BTreeSet<String>> {
    let mut normalized = BTreeSet::new();
    for permission in permissions {
        let name = permission
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_uppercase() || c == ' ') {
            return Err(ProviderError::InvalidInput(format!(
                "invalid permission name '{}'",
                permission
            )));
        }
        normalized.insert(name);
    }
    if normalized.is_empty() {
        return Err(ProviderError::InvalidInput(
            "at least one permission is required".to_string(),
        ));
    }
    Ok(normalized)
}

fn join(permissions: &BTreeSet<String>) -> String {
    permissions.iter().cloned().collect::<Vec<_>>().join(", ")
}

impl Connection {
    /// Resolve a scope id to the securable it names
    pub fn permission_scope(&self, raw: &str) -> ProviderResult<PermissionScope> {
        if raw == self.connection_id() {
            return Ok(PermissionScope::Database);
        }
        if EntityKind::Schema.is_kind(raw) {
            let id = self.parse_id(EntityKind::Schema, raw)?;
            return Ok(PermissionScope::Schema { schema_id: id.key() });
        }
        for kind in OBJECT_KINDS {
            if kind.is_kind(raw) {
                let id = self.parse_id(kind, raw)?;
                return Ok(PermissionScope::Object { object_id: id.key() });
            }
        }
        Err(ProviderError::id_format(
            raw,
            "expected a database connection id or a schema, table, view, function or procedure id",
        ))
    }

    fn permission_from_record(&self, record: &Record) -> ProviderResult<Permission> {
        let class = record.get_i64("class")?;
        let major_id = record.get_i64("major_id")?;
        let principal_id = record.get_i64("grantee_principal_id")?;
        let id = self.resource_id(EntityKind::Permission, &[class, major_id, principal_id])?;
        let permissions = record
            .get_string("permissions")?
            .split(',')
            .map(|p| p.trim().to_string())
            .collect();
        Ok(Permission {
            scope: PermissionScope::from_keys(&id.to_string(), class, major_id)?,
            id,
            connection_id: self.connection_id().to_string(),
            principal_id,
            permissions,
        })
    }

    fn permission_params(scope: PermissionScope, grantee: i64) -> Vec<Param> {
        vec![
            Param::new("class", scope.class()),
            Param::new("major_id", scope.major_id()),
            Param::new("grantee", grantee),
        ]
    }

    async fn permission_by_keys(&self, scope: PermissionScope, grantee: i64) -> ProviderResult<Option<Permission>> {
        let params = Self::permission_params(scope, grantee);
        self.read_one(SELECT_PERMISSION, &params, |r| self.permission_from_record(r))
            .await
    }

    async fn change_permissions(
        &self,
        statement: &str,
        scope: PermissionScope,
        grantee: i64,
        permissions: &BTreeSet<String>,
    ) -> ProviderResult<u64> {
        let mut params = Self::permission_params(scope, grantee);
        params.push(Param::new("permissions", join(permissions)));
        let sql = format!("{}{}", SECURABLE, statement);
        self.exec(&sql, &params).await
    }

    pub async fn create_permission(&self, input: &CreatePermissionInput) -> ProviderResult<Permission> {
        self.require_database_scope()?;
        let scope = self.permission_scope(&input.scope)?;
        let grantee = self.parse_principal_id(&input.principal)?.key();
        let wanted = normalize_permissions(&input.permissions)?;

        let name = format!("{} on {}", join(&wanted), input.scope);
        let granted = create_then_verify(
            EntityKind::Permission,
            &name,
            self.change_permissions(GRANT, scope, grantee, &wanted),
            || self.permission_by_keys(scope, grantee),
        )
        .await?;

        let missing: Vec<&String> = wanted
            .iter()
            .filter(|p| !granted.permissions.contains(p))
            .collect();
        if !missing.is_empty() {
            return Err(ProviderError::ConsistencyFault(format!(
                "permissions {:?} missing after grant on '{}'",
                missing, granted.id
            )));
        }
        Ok(granted)
    }

    pub async fn get_permission_from_id(&self, id: &str) -> ProviderResult<Option<Permission>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Permission, id)?;
        let scope = PermissionScope::from_keys(&id.to_string(), id.keys()[0], id.keys()[1])?;
        self.permission_by_keys(scope, id.keys()[2]).await
    }

    /// Converge the granted set: grant what is new, revoke what is gone
    pub async fn update_permission(&self, id: &str, permissions: &[String]) -> ProviderResult<Permission> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Permission, id)?;
        let scope = PermissionScope::from_keys(&id.to_string(), id.keys()[0], id.keys()[1])?;
        let grantee = id.keys()[2];
        let wanted = normalize_permissions(permissions)?;

        let current: BTreeSet<String> = self
            .permission_by_keys(scope, grantee)
            .await?
            .map(|p| p.permissions.into_iter().collect())
            .unwrap_or_default();
        let to_grant: BTreeSet<String> = wanted.difference(&current).cloned().collect();
        let to_revoke: BTreeSet<String> = current.difference(&wanted).cloned().collect();

        let ddl = async {
            let mut rows = 0u64;
            if !to_grant.is_empty() {
                rows += self.change_permissions(GRANT, scope, grantee, &to_grant).await?;
            }
            if !to_revoke.is_empty() {
                rows += self.change_permissions(REVOKE, scope, grantee, &to_revoke).await?;
            }
            Ok::<u64, ProviderError>(rows)
        };
        let updated = update_then_verify(EntityKind::Permission, &id, ddl, || {
            self.permission_by_keys(scope, grantee)
        })
        .await?;

        if updated.permissions.iter().cloned().collect::<BTreeSet<_>>() != wanted {
            return Err(ProviderError::ConsistencyFault(format!(
                "permissions on '{}' are {:?} after update, expected {:?}",
                id, updated.permissions, wanted
            )));
        }
        Ok(updated)
    }

    /// Revoke every permission the grantee holds on the securable
    pub async fn drop_permission(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::Permission, id)?;
        let scope = PermissionScope::from_keys(&id.to_string(), id.keys()[0], id.keys()[1])?;
        let grantee = id.keys()[2];
        let params = Self::permission_params(scope, grantee);
        let sql = format!("{}{}", SECURABLE, REVOKE_ALL);
        delete_then_verify(
            EntityKind::Permission,
            &id.to_string(),
            || self.permission_by_keys(scope, grantee),
            || self.exec(&sql, &params),
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

    fn granted(class: i64, major_id: i64, permissions: &str) -> Record {
        Record::from_pairs(&[
            ("class", CellValue::Int(class)),
            ("major_id", CellValue::Int(major_id)),
            ("grantee_principal_id", CellValue::Int(5)),
            ("permissions", permissions.into()),
        ])
    }

    #[test]
    fn test_normalize_permissions() {
        let input = vec![
            "select".to_string(),
            " view   definition ".to_string(),
            "SELECT".to_string(),
        ];
        let normalized: Vec<String> = normalize_permissions(&input).unwrap().into_iter().collect();
        assert_eq!(normalized, vec!["SELECT", "VIEW DEFINITION"]);

        assert!(normalize_permissions(&[]).is_err());
        assert!(normalize_permissions(&["SELECT; DROP".to_string()]).is_err());
    }

    #[test]
    fn test_permission_scope_from_ids() {
        let conn = FakeDb::new().connection(CONN);
        assert_eq!(conn.permission_scope(CONN).unwrap(), PermissionScope::Database);
        assert_eq!(
            conn.permission_scope("sqlserver::s:1433:db/schema/7").unwrap(),
            PermissionScope::Schema { schema_id: 7 }
        );
        assert_eq!(
            conn.permission_scope("sqlserver::s:1433:db/view/300").unwrap(),
            PermissionScope::Object { object_id: 300 }
        );
        assert!(conn.permission_scope("sqlserver::s:1433:db/role/1").is_err());
        assert!(matches!(
            conn.permission_scope("sqlserver::s:1433:other/table/1"),
            Err(ProviderError::ConnectionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_grant_on_schema() {
        let db = FakeDb::new();
        db.on_query("sys.database_permissions", Some(granted(3, 7, "SELECT,UPDATE")));
        let conn = db.connection(CONN);

        let permission = conn
            .create_permission(&CreatePermissionInput {
                scope: "sqlserver::s:1433:db/schema/7".to_string(),
                principal: "sqlserver::s:1433:db/user/5".to_string(),
                permissions: vec!["select".to_string(), "update".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(permission.id.to_string(), "sqlserver::s:1433:db/permission/3/7/5");
        assert_eq!(permission.scope, PermissionScope::Schema { schema_id: 7 });

        let params = db.params_of("GRANT");
        assert_eq!(params[0], Param::new("class", 3i64));
        assert_eq!(params[3], Param::new("permissions", "SELECT, UPDATE"));
    }

    #[tokio::test]
    async fn test_grant_missing_after_read_back() {
        let db = FakeDb::new();
        db.on_query("sys.database_permissions", Some(granted(0, 0, "CONNECT")));
        let conn = db.connection(CONN);

        let err = conn
            .create_permission(&CreatePermissionInput {
                scope: CONN.to_string(),
                principal: "sqlserver::s:1433:db/user/5".to_string(),
                permissions: vec!["CONNECT".to_string(), "SHOWPLAN".to_string()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ConsistencyFault(_)));
    }

    #[tokio::test]
    async fn test_update_grants_and_revokes_difference() {
        let db = FakeDb::new();
        db.on_query_once("sys.database_permissions", Some(granted(1, 300, "INSERT,SELECT")))
            .on_query("sys.database_permissions", Some(granted(1, 300, "DELETE,SELECT")));
        let conn = db.connection(CONN);

        let updated = conn
            .update_permission(
                "sqlserver::s:1433:db/permission/1/300/5",
                &["SELECT".to_string(), "DELETE".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(updated.permissions, vec!["DELETE", "SELECT"]);
        assert_eq!(db.params_of("N'GRANT '")[3], Param::new("permissions", "DELETE"));
        assert_eq!(db.params_of("N'REVOKE '")[3], Param::new("permissions", "INSERT"));
    }

    #[tokio::test]
    async fn test_unknown_permission_class_in_id() {
        let conn = FakeDb::new().connection(CONN);
        let err = conn
            .get_permission_from_id("sqlserver::s:1433:db/permission/4/1/5")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::IdFormat { .. }));
    }

    #[tokio::test]
    async fn test_drop_permission_revokes_all() {
        let db = FakeDb::new();
        db.on_query_once("sys.database_permissions", Some(granted(0, 0, "CONNECT")));
        let conn = db.connection(CONN);

        conn.drop_permission("sqlserver::s:1433:db/permission/0/0/5")
            .await
            .unwrap();
        assert!(db.executed("DECLARE @granted"));
    }
}
