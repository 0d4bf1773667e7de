// Entity repositories
// Each module adds create / get / update / drop operations for one kind of object to Connection

pub mod database;
pub mod database_scoped_credential;
pub mod external_data_source;
pub mod function;
pub mod login;
pub mod master_key;
pub mod module;
pub mod permission;
pub mod procedure;
pub mod role;
pub mod role_member;
pub mod schema;
pub mod security_policy;
pub mod security_predicate;
pub mod table;
pub mod user;
pub mod view;

pub use database::Database;
pub use database_scoped_credential::{
    CreateDatabaseScopedCredentialInput, DatabaseScopedCredential, UpdateDatabaseScopedCredentialInput,
};
pub use external_data_source::{CreateExternalDataSourceInput, ExternalDataSource, UpdateExternalDataSourceInput};
pub use login::{CreateLoginInput, Login};
pub use master_key::MasterKey;
pub use module::{CreateModuleInput, ModuleKind, SqlModule};
pub use permission::{CreatePermissionInput, Permission, PermissionScope};
pub use role::{CreateRoleInput, Role, UpdateRoleInput};
pub use role_member::RoleMember;
pub use schema::{CreateSchemaInput, Schema};
pub use security_policy::{CreateSecurityPolicyInput, SecurityPolicy};
pub use security_predicate::{BlockOperation, CreateSecurityPredicateInput, PredicateType, SecurityPredicate};
pub use table::{CreateTableInput, Table, TableColumn, TableColumnInput};
pub use user::{CreateUserInput, User, UserAuthentication};

use uuid::Uuid;

use crate::db::connection::Connection;
use crate::db::traits::{Param, Record};
use crate::error::{ProviderError, ProviderResult};
use crate::resource_id::{EntityKind, ResourceId};

/// T-SQL expression quoting `param` as an `N'...'` literal inside dynamic SQL
pub(crate) fn sql_literal(param: &str) -> String {
    format!("N'''' + REPLACE({}, N'''', N'''''') + N''''", param)
}

impl Connection {
    /// Run a lookup and map its row, if any
    pub(crate) async fn read_one<T, F>(&self, sql: &str, params: &[Param], map: F) -> ProviderResult<Option<T>>
    where
        F: FnOnce(&Record) -> ProviderResult<T>,
    {
        match self.query_row(sql, params).await? {
            Some(record) => map(&record).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn resource_id(&self, kind: EntityKind, keys: &[i64]) -> ProviderResult<ResourceId> {
        ResourceId::new(kind, self.connection_id(), keys)
    }

    /// Decode an id of `kind` that must belong to this connection
    pub(crate) fn parse_id(&self, kind: EntityKind, raw: &str) -> ProviderResult<ResourceId> {
        ResourceId::parse_in_scope(kind, raw, self.connection_id())
    }

    /// Decode a principal id that may name either a role or a user
    pub(crate) fn parse_principal_id(&self, raw: &str) -> ProviderResult<ResourceId> {
        if EntityKind::Role.is_kind(raw) {
            self.parse_id(EntityKind::Role, raw)
        } else if EntityKind::User.is_kind(raw) {
            self.parse_id(EntityKind::User, raw)
        } else {
            Err(ProviderError::id_format(raw, "expected a role or user id"))
        }
    }
}

pub(crate) fn require_name(kind: EntityKind, name: &str) -> ProviderResult<()> {
    if name.trim().is_empty() {
        return Err(ProviderError::InvalidInput(format!("{} name must not be empty", kind)));
    }
    if name.chars().count() > 128 {
        return Err(ProviderError::InvalidInput(format!(
            "{} name '{}' is longer than 128 characters",
            kind, name
        )));
    }
    Ok(())
}

/// Kinds whose attributes can change in place; every other change means replace
pub fn supports_update(kind: EntityKind) -> bool {
    matches!(
        kind,
        EntityKind::Schema
            | EntityKind::Role
            | EntityKind::View
            | EntityKind::Function
            | EntityKind::Procedure
            | EntityKind::SecurityPolicy
            | EntityKind::ExternalDataSource
            | EntityKind::DatabaseScopedCredential
            | EntityKind::Permission
    )
}

pub fn ensure_updatable(kind: EntityKind) -> ProviderResult<()> {
    if supports_update(kind) {
        Ok(())
    } else {
        Err(ProviderError::UpdateNotSupported { kind: kind.label() })
    }
}

/// Entra ID object ids are GUIDs; returns the lowercase hyphenated form the catalog reports
pub(crate) fn normalize_object_id(object_id: &str) -> ProviderResult<String> {
    Uuid::parse_str(object_id)
        .map(|uuid| uuid.hyphenated().to_string())
        .map_err(|e| ProviderError::InvalidInput(format!("object id '{}' is not a GUID: {}", object_id, e)))
}
