// Connection identifiers and request-bound connections
// Parses `provider::server:port[:database]` and wraps a cached driver handle for one operation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tiberius::{Config, EncryptionLevel};

use crate::config::DEFAULT_APPLICATION_NAME;
use crate::db::cache::CacheInner;
use crate::db::context::RequestContext;
use crate::db::traits::{Param, Record, SqlHandle};
use crate::error::{ProviderError, ProviderResult};

/// Backend family named by the first segment of a connection id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    SqlServer,
    SynapseServerless,
    SynapseDedicated,
    Fabric,
}

impl ProviderKind {
    pub fn from_literal(literal: &str) -> Option<Self> {
        match literal {
            "sqlserver" => Some(ProviderKind::SqlServer),
            "synapse" => Some(ProviderKind::SynapseServerless),
            "synapsededicated" => Some(ProviderKind::SynapseDedicated),
            "fabric" => Some(ProviderKind::Fabric),
            _ => None,
        }
    }

    pub fn literal(&self) -> &'static str {
        match self {
            ProviderKind::SqlServer => "sqlserver",
            ProviderKind::SynapseServerless => "synapse",
            ProviderKind::SynapseDedicated => "synapsededicated",
            ProviderKind::Fabric => "fabric",
        }
    }

    /// Suffix appended to a short server name to form its DNS name
    pub fn host_suffix(&self) -> &'static str {
        match self {
            ProviderKind::SqlServer => ".database.windows.net",
            ProviderKind::SynapseServerless => "-ondemand.sql.azuresynapse.net",
            ProviderKind::SynapseDedicated => ".sql.azuresynapse.net",
            ProviderKind::Fabric => ".datawarehouse.fabric.microsoft.com",
        }
    }

    /// Display name for messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::SqlServer => "Azure SQL / SQL Server",
            ProviderKind::SynapseServerless => "Synapse serverless SQL pool",
            ProviderKind::SynapseDedicated => "Synapse dedicated SQL pool",
            ProviderKind::Fabric => "Fabric warehouse",
        }
    }
}

/// Parsed, immutable form of a connection id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub provider: ProviderKind,
    pub server: String,
    pub port: u16,
    pub database: Option<String>,
    pub is_server_scope: bool,
    pub connection_id: String,
    pub driver_connection_string: String,
}

impl ConnectionDescriptor {
    /// Parse a connection id. Pure; performs no I/O.
    pub fn parse(raw: &str) -> ProviderResult<Self> {
        let invalid = |reason: &str| ProviderError::InvalidConnectionId {
            id: raw.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() != 4 && segments.len() != 5 {
            return Err(invalid(
                "expected provider::server:port or provider::server:port:database",
            ));
        }
        if !segments[1].is_empty() {
            return Err(invalid("provider must be followed by '::'"));
        }

        let provider = ProviderKind::from_literal(segments[0]).ok_or_else(|| ProviderError::InvalidProvider {
            id: raw.to_string(),
            provider: segments[0].to_string(),
        })?;

        let server = segments[2];
        if server.is_empty() {
            return Err(invalid("server must not be empty"));
        }
        if server.contains('/') {
            return Err(invalid("server must not contain '/'"));
        }

        let port: u16 = segments[3].parse().map_err(|_| ProviderError::InvalidPort {
            id: raw.to_string(),
            port: segments[3].to_string(),
        })?;

        let database = match segments.get(4) {
            None => None,
            Some(db) if db.is_empty() => return Err(invalid("database must not be empty when given")),
            Some(db) if db.contains('/') => return Err(invalid("database must not contain '/'")),
            Some(db) => Some(db.to_string()),
        };

        Ok(Self::from_parts(provider, server, port, database))
    }

    fn from_parts(provider: ProviderKind, server: &str, port: u16, database: Option<String>) -> Self {
        let connection_id = match &database {
            Some(db) => format!("{}::{}:{}:{}", provider.literal(), server, port, db),
            None => format!("{}::{}:{}", provider.literal(), server, port),
        };
        let driver_connection_string =
            build_driver_connection_string(provider, server, port, database.as_deref(), DEFAULT_APPLICATION_NAME);

        Self {
            provider,
            server: server.to_string(),
            port,
            is_server_scope: database.is_none(),
            database,
            connection_id,
            driver_connection_string,
        }
    }

    /// Fully qualified host name of the server
    pub fn host(&self) -> String {
        resolve_host(self.provider, &self.server)
    }

    pub fn scope_name(&self) -> &'static str {
        if self.is_server_scope {
            "server"
        } else {
            "database"
        }
    }

    /// Connection id of the server this descriptor lives on
    pub fn server_connection_id(&self) -> String {
        format!("{}::{}:{}", self.provider.literal(), self.server, self.port)
    }

    /// Connection id of `database` on the same server
    pub fn database_connection_id(&self, database: &str) -> String {
        format!("{}:{}", self.server_connection_id(), database)
    }

    /// Driver connection string naming `application_name` instead of the default
    pub fn driver_connection_string_for(&self, application_name: &str) -> String {
        build_driver_connection_string(
            self.provider,
            &self.server,
            self.port,
            self.database.as_deref(),
            application_name,
        )
    }

    /// tiberius configuration for this target; authentication is set by the driver
    pub fn to_tiberius_config(&self, application_name: &str) -> Config {
        let mut config = Config::new();
        config.host(self.host());
        config.port(self.port);
        if let Some(database) = &self.database {
            config.database(database);
        }
        config.application_name(application_name);
        config.encryption(EncryptionLevel::Required);
        config
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connection_id)
    }
}

/// Short names get the provider's DNS suffix; anything with a dot, or localhost, is used verbatim
fn resolve_host(provider: ProviderKind, server: &str) -> String {
    if server.contains('.') || server.eq_ignore_ascii_case("localhost") {
        server.to_string()
    } else {
        format!("{}{}", server, provider.host_suffix())
    }
}

fn build_driver_connection_string(
    provider: ProviderKind,
    server: &str,
    port: u16,
    database: Option<&str>,
    application_name: &str,
) -> String {
    let mut parts = vec![format!("Server=tcp:{},{}", resolve_host(provider, server), port)];
    if let Some(db) = database {
        parts.push(format!("Database={}", db));
    }
    parts.push("Encrypt=true".to_string());
    parts.push("TrustServerCertificate=false".to_string());
    parts.push("Authentication=ActiveDirectoryDefault".to_string());
    parts.push(format!("Application Name={}", application_name));
    parts.join(";")
}

/// A cached driver handle bound to one request.
///
/// Cheap to clone. Repositories borrow it and never close the handle.
#[derive(Clone)]
pub struct Connection {
    descriptor: Arc<ConnectionDescriptor>,
    handle: Arc<dyn SqlHandle>,
    ctx: RequestContext,
    cache: Weak<CacheInner>,
}

impl Connection {
    pub(crate) fn new(
        descriptor: Arc<ConnectionDescriptor>,
        handle: Arc<dyn SqlHandle>,
        ctx: RequestContext,
        cache: Weak<CacheInner>,
    ) -> Self {
        Self {
            descriptor,
            handle,
            ctx,
            cache,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.descriptor.connection_id
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn is_server_scope(&self) -> bool {
        self.descriptor.is_server_scope
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Same handle, bound to another request
    pub fn with_context(&self, ctx: RequestContext) -> Self {
        Self {
            ctx,
            ..self.clone()
        }
    }

    /// True when both connections share the same underlying driver handle
    pub fn same_handle(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }

    pub(crate) fn require_server_scope(&self) -> ProviderResult<()> {
        if !self.descriptor.is_server_scope {
            return Err(ProviderError::ScopeMismatch {
                connection_id: self.connection_id().to_string(),
                expected: "server",
                actual: "database",
            });
        }
        Ok(())
    }

    pub(crate) fn require_database_scope(&self) -> ProviderResult<()> {
        if self.descriptor.is_server_scope {
            return Err(ProviderError::ScopeMismatch {
                connection_id: self.connection_id().to_string(),
                expected: "database",
                actual: "server",
            });
        }
        Ok(())
    }

    pub async fn exec(&self, sql: &str, params: &[Param]) -> ProviderResult<u64> {
        let start = Instant::now();
        let result = self.ctx.run(self.handle.exec(sql, params)).await;
        match &result {
            Ok(rows) => tracing::debug!(
                connection_id = %self.connection_id(),
                rows,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "statement executed"
            ),
            Err(e) => tracing::debug!(
                connection_id = %self.connection_id(),
                error = %e,
                "statement failed"
            ),
        }
        result
    }

    pub async fn query_row(&self, sql: &str, params: &[Param]) -> ProviderResult<Option<Record>> {
        self.ctx.run(self.handle.query_row(sql, params)).await
    }

    /// Forget cached connections to `database` on this server, whose sessions a drop has killed
    pub(crate) async fn invalidate_database(&self, database: &str) {
        if let Some(cache) = self.cache.upgrade() {
            cache
                .invalidate(&self.descriptor.database_connection_id(database))
                .await;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.descriptor.connection_id)
            .finish()
    }
}
