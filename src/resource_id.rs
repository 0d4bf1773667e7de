// Composite resource ids
// `<connection id>/<entity kind>/<key>[/<key>...]`, persisted in Terraform state and accepted by import

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::connection::ConnectionDescriptor;
use crate::error::{ProviderError, ProviderResult};

/// Every kind of object the provider manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Database,
    Login,
    Schema,
    Role,
    User,
    RoleMember,
    Permission,
    Table,
    View,
    Function,
    Procedure,
    SecurityPolicy,
    SecurityPredicate,
    ExternalDataSource,
    DatabaseScopedCredential,
    MasterKey,
}

impl EntityKind {
    pub const ALL: [EntityKind; 16] = [
        EntityKind::Database,
        EntityKind::Login,
        EntityKind::Schema,
        EntityKind::Role,
        EntityKind::User,
        EntityKind::RoleMember,
        EntityKind::Permission,
        EntityKind::Table,
        EntityKind::View,
        EntityKind::Function,
        EntityKind::Procedure,
        EntityKind::SecurityPolicy,
        EntityKind::SecurityPredicate,
        EntityKind::ExternalDataSource,
        EntityKind::DatabaseScopedCredential,
        EntityKind::MasterKey,
    ];

    /// Path segment between the connection id and the keys
    pub fn marker(self) -> &'static str {
        match self {
            EntityKind::Database => "/database/",
            EntityKind::Login => "/login/",
            EntityKind::Schema => "/schema/",
            EntityKind::Role => "/role/",
            EntityKind::User => "/user/",
            EntityKind::RoleMember => "/rolemember/",
            EntityKind::Permission => "/permission/",
            EntityKind::Table => "/table/",
            EntityKind::View => "/view/",
            EntityKind::Function => "/function/",
            EntityKind::Procedure => "/procedure/",
            EntityKind::SecurityPolicy => "/securitypolicy/",
            EntityKind::SecurityPredicate => "/securitypredicate/",
            EntityKind::ExternalDataSource => "/externaldatasource/",
            EntityKind::DatabaseScopedCredential => "/databasescopedcredential/",
            EntityKind::MasterKey => "/masterkey/",
        }
    }

    /// Number of numeric keys following the marker
    pub fn arity(self) -> usize {
        match self {
            EntityKind::RoleMember | EntityKind::SecurityPredicate => 2,
            EntityKind::Permission => 3,
            _ => 1,
        }
    }

    /// Human readable name used in messages
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Database => "database",
            EntityKind::Login => "login",
            EntityKind::Schema => "schema",
            EntityKind::Role => "role",
            EntityKind::User => "user",
            EntityKind::RoleMember => "role member",
            EntityKind::Permission => "permission",
            EntityKind::Table => "table",
            EntityKind::View => "view",
            EntityKind::Function => "function",
            EntityKind::Procedure => "procedure",
            EntityKind::SecurityPolicy => "security policy",
            EntityKind::SecurityPredicate => "security predicate",
            EntityKind::ExternalDataSource => "external data source",
            EntityKind::DatabaseScopedCredential => "database scoped credential",
            EntityKind::MasterKey => "master key",
        }
    }

    /// Objects that live on the server rather than inside a database
    pub fn is_server_scoped(self) -> bool {
        matches!(self, EntityKind::Database | EntityKind::Login)
    }

    /// Cheap check whether `id` is a well-formed id of this kind
    pub fn is_kind(self, id: &str) -> bool {
        id.contains(self.marker()) && ResourceId::parse_as(self, id).is_ok()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Decoded composite id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    connection_id: String,
    kind: EntityKind,
    keys: Vec<i64>,
}

impl ResourceId {
    pub fn new(kind: EntityKind, connection_id: impl Into<String>, keys: &[i64]) -> ProviderResult<Self> {
        let connection_id = connection_id.into();
        if connection_id.is_empty() {
            return Err(ProviderError::InvalidInput(format!(
                "{} id needs a connection id",
                kind
            )));
        }
        if connection_id.contains('/') {
            return Err(ProviderError::InvalidInput(format!(
                "connection id '{}' must not contain '/'",
                connection_id
            )));
        }
        if keys.len() != kind.arity() {
            return Err(ProviderError::InvalidInput(format!(
                "{} id takes {} key(s), got {}",
                kind,
                kind.arity(),
                keys.len()
            )));
        }
        Ok(Self {
            connection_id,
            kind,
            keys: keys.to_vec(),
        })
    }

    /// Encode `(connection id, keys)` for `kind` as a string
    pub fn format(kind: EntityKind, connection_id: &str, keys: &[i64]) -> ProviderResult<String> {
        Ok(Self::new(kind, connection_id, keys)?.to_string())
    }

    /// Decode an id of any kind, sniffing the kind from its marker
    pub fn parse(raw: &str) -> ProviderResult<Self> {
        let mut found = EntityKind::ALL.iter().copied().filter(|k| raw.contains(k.marker()));
        match (found.next(), found.next()) {
            (Some(kind), None) => Self::parse_as(kind, raw),
            (None, _) => Err(ProviderError::id_format(raw, "no entity kind marker found")),
            (Some(a), Some(b)) => Err(ProviderError::id_format(
                raw,
                format!("ambiguous entity kind ('{}' and '{}')", a.marker(), b.marker()),
            )),
        }
    }

    /// Decode an id that must be of `kind`
    pub fn parse_as(kind: EntityKind, raw: &str) -> ProviderResult<Self> {
        let marker = kind.marker();
        match raw.matches(marker).count() {
            0 => return Err(ProviderError::id_format(raw, format!("missing '{}' marker", marker))),
            1 => {}
            _ => {
                return Err(ProviderError::id_format(
                    raw,
                    format!("'{}' marker occurs more than once", marker),
                ))
            }
        }

        let (connection_id, rest) = raw
            .split_once(marker)
            .ok_or_else(|| ProviderError::id_format(raw, format!("missing '{}' marker", marker)))?;

        if connection_id.is_empty() {
            return Err(ProviderError::id_format(raw, "empty connection id"));
        }
        if connection_id.contains('/') {
            return Err(ProviderError::id_format(raw, "unexpected '/' before the entity marker"));
        }

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != kind.arity() {
            return Err(ProviderError::id_format(
                raw,
                format!("expected {} key(s) after '{}', found {}", kind.arity(), marker, segments.len()),
            ));
        }

        let keys = segments
            .iter()
            .map(|segment| parse_key(raw, segment))
            .collect::<ProviderResult<Vec<i64>>>()?;

        Ok(Self {
            connection_id: connection_id.to_string(),
            kind,
            keys,
        })
    }

    /// Decode an id of `kind` and require that it belongs to `connection_id`.
    ///
    /// Connection ids are compared in canonical form; the returned id carries `connection_id`.
    pub fn parse_in_scope(kind: EntityKind, raw: &str, connection_id: &str) -> ProviderResult<Self> {
        let mut id = Self::parse_as(kind, raw)?;
        if id.connection_id != connection_id {
            let canonical = ConnectionDescriptor::parse(&id.connection_id).ok().map(|d| d.connection_id);
            if canonical.as_deref() != Some(connection_id) {
                return Err(ProviderError::ConnectionMismatch {
                    id: raw.to_string(),
                    id_connection: id.connection_id,
                    connection_id: connection_id.to_string(),
                });
            }
            id.connection_id = connection_id.to_string();
        }
        Ok(id)
    }

    /// Same id with its connection id in canonical form, when it parses as one
    pub fn canonicalize(self) -> Self {
        match ConnectionDescriptor::parse(&self.connection_id) {
            Ok(descriptor) => Self {
                connection_id: descriptor.connection_id,
                ..self
            },
            Err(_) => self,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    /// First (for most kinds, only) native key
    pub fn key(&self) -> i64 {
        self.keys[0]
    }
}

/// Keys must be written exactly as `i64::to_string` would write them
fn parse_key(raw: &str, segment: &str) -> ProviderResult<i64> {
    let value: i64 = segment
        .parse()
        .map_err(|_| ProviderError::id_format(raw, format!("key '{}' is not an integer", segment)))?;
    if value.to_string() != segment {
        return Err(ProviderError::id_format(
            raw,
            format!("key '{}' is not in canonical form", segment),
        ));
    }
    Ok(value)
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connection_id)?;
        f.write_str(self.kind.marker())?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ResourceId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
