// MS-SQL Driver
// Implements Dialer / SqlHandle with tiberius, one bb8 pool per connection id

use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tiberius::{AuthMethod, ColumnType, Query, Row};

use crate::config::ProviderConfig;
use crate::db::connection::ConnectionDescriptor;
use crate::db::traits::{CellValue, Dialer, Param, Record, SqlHandle, TokenSource};
use crate::error::{ProviderError, ProviderResult};

/// Token audience for Azure SQL, Synapse and Fabric SQL endpoints
pub const SQL_TOKEN_RESOURCE: &str = "https://database.windows.net/";

/// Type alias for our connection pool
pub type MssqlPool = Pool<ConnectionManager>;

/// How the driver authenticates
#[derive(Clone)]
pub enum MssqlAuth {
    /// Azure AD access token from an external credential chain
    AadToken(Arc<dyn TokenSource>),
    /// SQL login, for local SQL Server instances
    SqlLogin { username: String, password: String },
}

impl std::fmt::Debug for MssqlAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MssqlAuth::AadToken(_) => f.write_str("AadToken"),
            MssqlAuth::SqlLogin { username, .. } => write!(f, "SqlLogin({})", username),
        }
    }
}

/// Opens pooled tiberius connections
pub struct MssqlDialer {
    auth: MssqlAuth,
    application_name: String,
    pool_max_size: u32,
}

impl MssqlDialer {
    pub fn new(auth: MssqlAuth, config: &ProviderConfig) -> Self {
        Self {
            auth,
            application_name: config.application_name.clone(),
            pool_max_size: config.pool_max_size,
        }
    }

    async fn authentication(&self) -> ProviderResult<AuthMethod> {
        match &self.auth {
            MssqlAuth::AadToken(source) => {
                let token = source.token(SQL_TOKEN_RESOURCE).await?;
                Ok(AuthMethod::aad_token(token))
            }
            MssqlAuth::SqlLogin { username, password } => Ok(AuthMethod::sql_server(username, password)),
        }
    }
}

#[async_trait::async_trait]
impl Dialer for MssqlDialer {
    async fn dial(&self, descriptor: &ConnectionDescriptor) -> ProviderResult<Arc<dyn SqlHandle>> {
        tracing::debug!(
            target_string = %descriptor.driver_connection_string_for(&self.application_name),
            "opening pool"
        );
        let mut tiberius_config = descriptor.to_tiberius_config(&self.application_name);
        tiberius_config.authentication(self.authentication().await?);

        let manager = ConnectionManager::build(tiberius_config).map_err(|e| ProviderError::ConnectionFailed {
            connection_id: descriptor.connection_id.clone(),
            message: e.to_string(),
        })?;

        let pool = Pool::builder()
            .max_size(self.pool_max_size)
            .build(manager)
            .await
            .map_err(|e| ProviderError::ConnectionFailed {
                connection_id: descriptor.connection_id.clone(),
                message: e.to_string(),
            })?;

        Ok(Arc::new(MssqlHandle {
            connection_id: descriptor.connection_id.clone(),
            pool,
            broken: AtomicBool::new(false),
        }))
    }
}

/// A pooled tiberius handle for one connection id
pub struct MssqlHandle {
    connection_id: String,
    pool: MssqlPool,
    broken: AtomicBool,
}

impl MssqlHandle {
    /// Transport failures poison the handle so the cache redials on next acquire
    fn observe<T, E>(&self, result: Result<T, E>) -> ProviderResult<T>
    where
        E: Into<ProviderError> + BrokenHint,
    {
        result.map_err(|e| {
            if e.is_transport_failure() {
                tracing::warn!(connection_id = %self.connection_id, "transport failure, marking connection broken");
                self.broken.store(true, Ordering::SeqCst);
            }
            e.into()
        })
    }
}

/// Distinguishes transport failures from statement errors
trait BrokenHint {
    fn is_transport_failure(&self) -> bool;
}

impl BrokenHint for tiberius::error::Error {
    fn is_transport_failure(&self) -> bool {
        matches!(self, tiberius::error::Error::Io { .. } | tiberius::error::Error::Tls(_))
    }
}

impl<E> BrokenHint for bb8::RunError<E> {
    fn is_transport_failure(&self) -> bool {
        true
    }
}

/// Poisons the handle if a statement future is dropped before it finishes.
/// An abandoned statement leaves unread TDS tokens on the connection.
struct InFlight<'a> {
    broken: &'a AtomicBool,
    connection_id: &'a str,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn start(broken: &'a AtomicBool, connection_id: &'a str) -> Self {
        Self {
            broken,
            connection_id,
            finished: false,
        }
    }

    fn finish<T>(mut self, result: T) -> T {
        self.finished = true;
        result
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(connection_id = %self.connection_id, "statement abandoned mid-stream, marking connection broken");
            self.broken.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl SqlHandle for MssqlHandle {
    async fn ping(&self) -> ProviderResult<()> {
        let guard = InFlight::start(&self.broken, &self.connection_id);
        let result = async move {
            let mut conn = self.observe(self.pool.get().await)?;
            let stream = self.observe(conn.simple_query("SELECT 1").await)?;
            self.observe(stream.into_results().await)?;
            Ok::<_, ProviderError>(())
        }
        .await;
        guard.finish(result)
    }

    async fn exec(&self, sql: &str, params: &[Param]) -> ProviderResult<u64> {
        let batch = with_declarations(sql, params)?;
        let guard = InFlight::start(&self.broken, &self.connection_id);
        let result = async move {
            let mut conn = self.observe(self.pool.get().await)?;
            let query = bind_all(Query::new(batch), params);
            let result = self.observe(query.execute(&mut *conn).await)?;
            Ok::<_, ProviderError>(result.total())
        }
        .await;
        guard.finish(result)
    }

    async fn query_row(&self, sql: &str, params: &[Param]) -> ProviderResult<Option<Record>> {
        let batch = with_declarations(sql, params)?;
        let guard = InFlight::start(&self.broken, &self.connection_id);
        let result = async move {
            let mut conn = self.observe(self.pool.get().await)?;
            let query = bind_all(Query::new(batch), params);
            let stream = self.observe(query.query(&mut *conn).await)?;
            let row = self.observe(stream.into_row().await)?;
            Ok::<_, ProviderError>(row.map(|row| record_from_row(&row)))
        }
        .await;
        guard.finish(result)
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }
}

/// Prefix the batch with one `DECLARE @name <type> = @Pn;` per parameter so
/// statements can refer to parameters by name
fn with_declarations(sql: &str, params: &[Param]) -> ProviderResult<String> {
    let mut batch = String::new();
    for (idx, param) in params.iter().enumerate() {
        if !is_identifier(param.name) {
            return Err(ProviderError::InvalidInput(format!(
                "invalid parameter name '{}'",
                param.name
            )));
        }
        batch.push_str(&format!(
            "DECLARE @{} {} = @P{};\n",
            param.name,
            sql_type(&param.value),
            idx + 1
        ));
    }
    batch.push_str(sql);
    Ok(batch)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sql_type(value: &CellValue) -> &'static str {
    match value {
        CellValue::Int(_) => "BIGINT",
        CellValue::Bool(_) => "BIT",
        CellValue::Binary(_) => "VARBINARY(MAX)",
        CellValue::String(_) | CellValue::Null => "NVARCHAR(MAX)",
    }
}

fn bind_all<'a>(mut query: Query<'a>, params: &[Param]) -> Query<'a> {
    for param in params {
        match &param.value {
            CellValue::Null => query.bind(Option::<String>::None),
            CellValue::Bool(v) => query.bind(*v),
            CellValue::Int(v) => query.bind(*v),
            CellValue::String(v) => query.bind(v.clone()),
            CellValue::Binary(v) => query.bind(v.clone()),
        }
    }
    query
}

fn record_from_row(row: &Row) -> Record {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| cell_value_from_row(row, idx, &col.column_type()))
        .collect();
    Record::new(columns, values)
}

/// Convert a tiberius column value to CellValue
fn cell_value_from_row(row: &Row, idx: usize, col_type: &ColumnType) -> CellValue {
    match col_type {
        ColumnType::Null => CellValue::Null,
        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        ColumnType::Intn => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(|v| v as i64))
            .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(|v| v as i64))
            .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(|v| v as i64))
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Binary(v.to_vec()))
            .unwrap_or(CellValue::Null),
        _ => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::String(v.to_string()))
            .unwrap_or(CellValue::Null),
    }
}
