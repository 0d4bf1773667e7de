// Row-Level Security Policies
// Policies are created empty; predicates are added by the security_predicate repository

use serde::{Deserialize, Serialize};

use super::require_name;
use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::ProviderResult;
use crate::reconcile::{create_then_verify, delete_then_verify, update_then_verify, Snapshot};
use crate::resource_id::{EntityKind, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub id: ResourceId,
    pub connection_id: String,
    pub schema: String,
    pub name: String,
    pub object_id: i64,
    pub enabled: bool,
}

impl Snapshot for SecurityPolicy {
    fn resource_id(&self) -> &ResourceId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecurityPolicyInput {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

const SELECT_POLICY: &str = r#"
SELECT p.object_id, SCHEMA_NAME(p.schema_id) AS schema_name, p.name, p.is_enabled
FROM sys.security_policies p"#;

const CREATE_POLICY: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'CREATE SECURITY POLICY ' + QUOTENAME(@schema) + N'.' + QUOTENAME(@name)
    + N' WITH (STATE = ' + IIF(@enabled = 1, N'ON', N'OFF') + N')';
EXEC (@sql);
"#;

const ALTER_POLICY_STATE: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'ALTER SECURITY POLICY ' + QUOTENAME(OBJECT_SCHEMA_NAME(@object_id)) + N'.' + QUOTENAME(OBJECT_NAME(@object_id))
    + N' WITH (STATE = ' + IIF(@enabled = 1, N'ON', N'OFF') + N')';
IF @sql IS NULL
    THROW 50000, 'security policy does not exist', 1;
EXEC (@sql);
"#;

const DROP_POLICY: &str = r#"
DECLARE @sql NVARCHAR(MAX) = N'DROP SECURITY POLICY ' + QUOTENAME(OBJECT_SCHEMA_NAME(@object_id)) + N'.' + QUOTENAME(OBJECT_NAME(@object_id));
IF @sql IS NULL
    THROW 50000, 'security policy does not exist', 1;
EXEC (@sql);
"#;

impl Connection {
    fn security_policy_from_record(&self, record: &Record) -> ProviderResult<SecurityPolicy> {
        let object_id = record.get_i64("object_id")?;
        Ok(SecurityPolicy {
            id: self.resource_id(EntityKind::SecurityPolicy, &[object_id])?,
            connection_id: self.connection_id().to_string(),
            schema: record.get_string("schema_name")?,
            name: record.get_string("name")?,
            object_id,
            enabled: record.get_bool("is_enabled")?,
        })
    }

    pub async fn create_security_policy(&self, input: &CreateSecurityPolicyInput) -> ProviderResult<SecurityPolicy> {
        self.require_database_scope()?;
        require_name(EntityKind::Schema, &input.schema)?;
        require_name(EntityKind::SecurityPolicy, &input.name)?;

        let params = [
            Param::new("schema", input.schema.as_str()),
            Param::new("name", input.name.as_str()),
            Param::new("enabled", input.enabled),
        ];
        let name = format!("{}.{}", input.schema, input.name);
        create_then_verify(
            EntityKind::SecurityPolicy,
            &name,
            self.exec(CREATE_POLICY, &params),
            || self.get_security_policy_from_name(&input.schema, &input.name),
        )
        .await
    }

    pub async fn get_security_policy_from_name(
        &self,
        schema: &str,
        name: &str,
    ) -> ProviderResult<Option<SecurityPolicy>> {
        self.require_database_scope()?;
        let sql = format!("{} WHERE p.schema_id = SCHEMA_ID(@schema) AND p.name = @name", SELECT_POLICY);
        let params = [Param::new("schema", schema), Param::new("name", name)];
        self.read_one(&sql, &params, |r| self.security_policy_from_record(r))
            .await
    }

    pub async fn get_security_policy_from_id(&self, id: &str) -> ProviderResult<Option<SecurityPolicy>> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::SecurityPolicy, id)?;
        self.security_policy_by_key(id.key()).await
    }

    pub(crate) async fn security_policy_by_key(&self, object_id: i64) -> ProviderResult<Option<SecurityPolicy>> {
        let sql = format!("{} WHERE p.object_id = @object_id", SELECT_POLICY);
        self.read_one(&sql, &[Param::new("object_id", object_id)], |r| {
            self.security_policy_from_record(r)
        })
        .await
    }

    /// Switch enforcement on or off
    pub async fn update_security_policy_state(&self, id: &str, enabled: bool) -> ProviderResult<SecurityPolicy> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::SecurityPolicy, id)?;
        let params = [Param::new("object_id", id.key()), Param::new("enabled", enabled)];
        update_then_verify(
            EntityKind::SecurityPolicy,
            &id,
            self.exec(ALTER_POLICY_STATE, &params),
            || self.security_policy_by_key(id.key()),
        )
        .await
    }

    pub async fn drop_security_policy(&self, id: &str) -> ProviderResult<()> {
        self.require_database_scope()?;
        let id = self.parse_id(EntityKind::SecurityPolicy, id)?;
        let params = [Param::new("object_id", id.key())];
        delete_then_verify(
            EntityKind::SecurityPolicy,
            &id.to_string(),
            || self.security_policy_by_key(id.key()),
            || self.exec(DROP_POLICY, &params),
        )
        .await
    }
}
