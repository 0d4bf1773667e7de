// Provider
// Root object owning the configuration and the connection cache for one provider instance

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::ProviderConfig;
use crate::db::cache::ConnectionCache;
use crate::db::connection::Connection;
use crate::db::context::RequestContext;
use crate::db::drivers::mssql::{MssqlAuth, MssqlDialer};
use crate::db::traits::Dialer;
use crate::error::ProviderResult;
use crate::resource_id::ResourceId;

/// Explicitly constructed provider state; clones share the same cache
#[derive(Clone)]
pub struct Provider {
    config: Arc<ProviderConfig>,
    cache: ConnectionCache,
}

impl Provider {
    /// Create a provider over any dialer
    pub fn new(config: ProviderConfig, dialer: Arc<dyn Dialer>) -> ProviderResult<Self> {
        config.validate()?;
        tracing::info!(
            expire_after_secs = config.cache.expire_after.as_secs(),
            refresh_after_secs = config.cache.refresh_after.as_secs(),
            pool_max_size = config.pool_max_size,
            "provider configured"
        );
        let cache = ConnectionCache::new(dialer, config.cache, config.connect_timeout);
        Ok(Self {
            config: Arc::new(config),
            cache,
        })
    }

    /// Create a provider that talks to real endpoints through tiberius
    pub fn with_mssql(config: ProviderConfig, auth: MssqlAuth) -> ProviderResult<Self> {
        let dialer = Arc::new(MssqlDialer::new(auth, &config));
        Self::new(config, dialer)
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Bounded request context using the configured connect timeout as a floor
    pub fn request(&self, timeout: Option<Duration>) -> RequestContext {
        match timeout {
            Some(timeout) => RequestContext::with_timeout(timeout.max(self.config.connect_timeout)),
            None => RequestContext::new(),
        }
    }

    pub async fn connect(
        &self,
        ctx: &RequestContext,
        connection_id: &str,
        expect_server_scope: bool,
    ) -> ProviderResult<Connection> {
        self.cache.connect(ctx, connection_id, expect_server_scope).await
    }

    pub async fn connect_server_or_database(
        &self,
        ctx: &RequestContext,
        server: &str,
        database: &str,
    ) -> ProviderResult<Connection> {
        self.cache.connect_server_or_database(ctx, server, database).await
    }

    /// Connect to whatever a composite resource id points at, e.g. during import.
    /// The returned id carries the canonical connection id.
    pub async fn connect_for_resource(&self, ctx: &RequestContext, id: &str) -> ProviderResult<(Connection, ResourceId)> {
        let id = ResourceId::parse(id)?.canonicalize();
        let connection = self
            .cache
            .connect(ctx, id.connection_id(), id.kind().is_server_scoped())
            .await?;
        Ok((connection, id))
    }

    /// Periodically evict idle cache entries so their pools close between plan and apply
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    tracing::info!(purged, "evicted idle connections");
                }
            }
        })
    }

    /// Drop every cached connection
    pub async fn shutdown(&self) {
        let open = self.cache.len().await;
        self.cache.clear().await;
        tracing::info!(closed = open, "provider shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::db::fake::FakeDialer;
    use crate::error::ProviderError;
    use crate::resource_id::EntityKind;

    fn provider() -> (Provider, Arc<FakeDialer>) {
        let dialer = Arc::new(FakeDialer::new());
        let config = ProviderConfig {
            cache: CacheConfig::testing(),
            ..ProviderConfig::default()
        };
        (Provider::new(config, dialer.clone()).unwrap(), dialer)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ProviderConfig {
            pool_max_size: 0,
            ..ProviderConfig::default()
        };
        let result = Provider::new(config, Arc::new(FakeDialer::new()));
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }

    #[tokio::test]
    async fn test_clones_share_the_cache() {
        let (provider, dialer) = provider();
        let other = provider.clone();
        let ctx = RequestContext::new();

        let a = provider.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        let b = other.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert!(a.same_handle(&b));
        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_for_resource_picks_scope_from_kind() {
        let (provider, _) = provider();
        let ctx = RequestContext::new();

        let (conn, id) = provider
            .connect_for_resource(&ctx, "sqlserver::s:1433/login/270")
            .await
            .unwrap();
        assert!(conn.is_server_scope());
        assert_eq!(id.kind(), EntityKind::Login);

        let (conn, id) = provider
            .connect_for_resource(&ctx, "fabric::ws:1433:lakehouse/schema/5")
            .await
            .unwrap();
        assert!(!conn.is_server_scope());
        assert_eq!(id.key(), 5);
    }

    #[tokio::test]
    async fn test_import_with_non_canonical_connection_id() {
        let (provider, _) = provider();
        let ctx = RequestContext::new();
        let raw = "sqlserver::s:01433:db/schema/5";

        let (conn, id) = provider.connect_for_resource(&ctx, raw).await.unwrap();
        assert_eq!(id.to_string(), "sqlserver::s:1433:db/schema/5");
        assert!(conn.get_schema_from_id(raw).await.unwrap().is_none());
        assert!(conn.get_schema_from_id(&id.to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_timeout_floor() {
        let (provider, _) = provider();
        assert!(provider.request(None).deadline().is_none());
        let ctx = provider.request(Some(Duration::from_millis(1)));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline >= tokio::time::Instant::now() + Duration::from_secs(29));
    }

    #[tokio::test]
    async fn test_purge_task_evicts_idle_entries() {
        let config = ProviderConfig {
            cache: CacheConfig {
                expire_after: Duration::from_millis(30),
                refresh_after: Duration::from_millis(10),
            },
            ..ProviderConfig::default()
        };
        let provider = Provider::new(config, Arc::new(FakeDialer::new())).unwrap();
        let ctx = RequestContext::new();
        provider.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert_eq!(provider.cache().len().await, 1);

        let task = provider.spawn_purge_task(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(provider.cache().len().await, 0);
        task.abort();
    }

    #[tokio::test]
    async fn test_shutdown_clears_cache() {
        let (provider, _) = provider();
        let ctx = RequestContext::new();
        provider.connect(&ctx, "sqlserver::s:1433", true).await.unwrap();
        provider.shutdown().await;
        assert!(provider.cache().is_empty().await);
    }
}
