// Role Membership
// ALTER ROLE ... ADD / DROP MEMBER, read back from sys.database_role_members

use serde::{Deserialize, Serialize};

use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::ProviderResult;
use crate::reconcile::{create_then_verify, delete_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

/// Membership of a role or user in a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleMember {
    pub id: ResourceId,
    pub connection_id: String,
    pub role_principal_id: i64,
    pub member_principal_id: i64,
    pub role_name: String,
    pub member_name: String,
    /// Composite id of the member, either a role id or a user id
    pub member_id: ResourceId,
}

impl Snapshot for RoleMember {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

const SELECT_MEMBER: &str = r#"
SELECT rm.role_principal_id, rm.member_principal_id,
    r.name AS role_name, m.name AS member_name,
    CAST(CASE WHEN m.type = 'R' THEN 1 ELSE 0 END AS BIT) AS member_is_role
FROM sys.database_role_members rm
JOIN sys.database_principals r ON r.principal_id = rm.role_principal_id
JOIN sys.database_principals m ON m.principal_id = rm.member_principal_id
WHERE rm.role_principal_id = @role AND rm.member_principal_id = @member"#;

const ADD_MEMBER: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'ALTER ROLE ' + QUOTENAME(USER_NAME(@role))
    + N' ADD MEMBER ' + QUOTENAME(USER_NAME(@member));
IF @sql IS NULL
    THROW 50000, 'role or member principal does not exist', 1;
EXEC (@sql);
"#;

const DROP_MEMBER: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'ALTER ROLE ' + QUOTENAME(USER_NAME(@role))
    + N' DROP MEMBER ' + QUOTENAME(USER_NAME(@member));
IF @sql IS NULL
    THROW 50000, 'role or member principal does not exist', 1;
EXEC (@sql);
"#;

impl Connection {
    fn role_member_from_record(&self, record: &Record) -> ProviderResult<RoleMember> {
        let role = record.get_i64("role_principal_id")?;
        let member = record.get_i64("member_principal_id")?;
        let member_kind = if record.get_bool("member_is_role")? {
            EntityKind::Role
        } else {
            EntityKind::User
        };
        Ok(RoleMember {
            id: self.resource_id(EntityKind::RoleMember, &[role, member])?,
            connection_id: self.connection_id().to_string(),
            role_principal_id: role,
            member_principal_id: member,
            role_name: record.get_string("role_name")?,
            member_name: record.get_string("member_name")?,
            member_id: self.resource_id(member_kind, &[member])?,
        })
    }

    /// Add `member` (a role or user id) to `role` (a role id)
    pub async fn create_role_member(&self, role: &str, member: &str) -> ProviderResult<RoleMember> {
        self.require_database_scope()?;
        let role = self.parse_id(EntityKind::Role, role)?;
        let member = self.parse_principal_id(member)?;

        let name = format!("{}/{}", role.key(), member.key());
        let params = [Param::new("role", role.key()), Param::new("member", member.key())];
        create_then_verify(
            EntityKind::RoleMember,
            &name,
            self.exec(ADD_MEMBER, &params),
            || self.role_member_by_keys(role.key(), member.key()),
        )
        .await
    }

    pub async fn get_role_member_from_id(&self, id: &str) -> ProviderResult<Option<RoleMember>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::RoleMember, id)?;
        self.role_member_by_keys(id.keys()[0], id.keys()[1]).await
    }

    async fn role_member_by_keys(&self, role: i64, member: i64) -> ProviderResult<Option<RoleMember>> {
        let params = [Param::new("role", role), Param::new("member", member)];
        self.read_one(SELECT_MEMBER, &params, |r| self.role_member_from_record(r))
            .await
    }

    pub async fn drop_role_member(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::RoleMember, id)?;
        let (role, member) = (id.keys()[0], id.keys()[1]);
        let params = [Param::new("role", role), Param::new("member", member)];
        delete_then_verify(
            EntityKind::RoleMember,
            &id.to_string(),
            || self.role_member_by_keys(role, member),
            || self.exec(DROP_MEMBER, &params),
        )
        .await
    }
}
