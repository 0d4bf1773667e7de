// Connection Cache
// Resolves connection ids to live driver handles; at most one handle per connection id

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::db::connection::{Connection, ConnectionDescriptor};
use crate::db::context::RequestContext;
use crate::db::traits::{Dialer, SqlHandle};
use crate::error::{ProviderError, ProviderResult};

/// Redial attempts in one acquire before giving up on an unstable target
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// A dialed and pinged driver handle, owned by the cache
pub struct PooledConnection {
    pub descriptor: Arc<ConnectionDescriptor>,
    pub handle: Arc<dyn SqlHandle>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct SlotTimes {
    last_used: Instant,
    last_validated: Instant,
}

/// One cache entry. The cell is empty until the first dial succeeds.
struct Slot {
    cell: OnceCell<PooledConnection>,
    times: Mutex<SlotTimes>,
    /// Callers currently holding a lease; only changed under the map lock or on lease drop
    leases: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            cell: OnceCell::new(),
            times: Mutex::new(SlotTimes {
                last_used: now,
                last_validated: now,
            }),
            leases: AtomicUsize::new(0),
        }
    }

    /// An empty slot nobody is dialing on can go
    fn is_abandoned(&self) -> bool {
        !self.cell.initialized() && self.leases.load(Ordering::SeqCst) == 0
    }

    fn times(&self) -> SlotTimes {
        *self.times.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self, validated: bool) {
        let now = Instant::now();
        let mut times = self.times.lock().unwrap_or_else(|e| e.into_inner());
        times.last_used = now;
        if validated {
            times.last_validated = now;
        }
    }

    fn is_expired(&self, config: &CacheConfig) -> bool {
        self.times().last_used.elapsed() >= config.expire_after
    }

    fn needs_refresh(&self, config: &CacheConfig) -> bool {
        self.times().last_validated.elapsed() >= config.refresh_after
    }
}

/// A caller's claim on a slot. Taken under the map lock so an empty slot
/// with no leases is never removed while someone is about to dial on it.
struct SlotLease {
    slot: Arc<Slot>,
}

impl SlotLease {
    fn take(slot: &Arc<Slot>) -> Self {
        slot.leases.fetch_add(1, Ordering::SeqCst);
        Self {
            slot: Arc::clone(slot),
        }
    }
}

impl Deref for SlotLease {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.slot
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.slot.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of one live entry, for inspection
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub connection_id: String,
    pub created_at: DateTime<Utc>,
    pub idle_for: Duration,
    pub since_validated: Duration,
}

pub(crate) struct CacheInner {
    dialer: Arc<dyn Dialer>,
    config: CacheConfig,
    connect_timeout: Duration,
    entries: RwLock<HashMap<String, Arc<Slot>>>,
    dials: AtomicU64,
}

impl CacheInner {
    async fn lease(&self, key: &str) -> SlotLease {
        {
            let entries = self.entries.read().await;
            if let Some(slot) = entries.get(key) {
                return SlotLease::take(slot);
            }
        }

        let mut entries = self.entries.write().await;
        let slot = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Slot::new()));
        SlotLease::take(slot)
    }

    /// Remove `slot` only if it is still the entry for `key`
    async fn evict(&self, key: &str, slot: &SlotLease) {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot.slot)) {
            entries.remove(key);
        }
    }

    /// Give up a lease after a failed or cancelled dial, dropping the slot if nobody else is dialing on it
    async fn release_failed(&self, key: &str, lease: SlotLease) {
        let mut entries = self.entries.write().await;
        let slot = Arc::clone(&lease.slot);
        drop(lease);
        let current = entries.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot));
        if current && slot.is_abandoned() {
            entries.remove(key);
        }
    }

    /// Drop a dialed entry. An entry still being dialed is left alone so its waiters share one handle.
    pub(crate) async fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        let dialed = entries.get(key).is_some_and(|slot| slot.cell.initialized());
        if dialed {
            entries.remove(key);
            tracing::info!(connection_id = %key, "connection invalidated");
        } else if entries.contains_key(key) {
            tracing::debug!(connection_id = %key, "dial in flight, not invalidated");
        }
        dialed
    }

    async fn dial_and_ping(&self, descriptor: &Arc<ConnectionDescriptor>) -> ProviderResult<PooledConnection> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            connection_id = %descriptor.connection_id,
            provider = descriptor.provider.display_name(),
            "dialing"
        );

        let connect = async {
            let handle = self.dialer.dial(descriptor).await.map_err(|e| connection_failed(descriptor, e))?;
            handle.ping().await.map_err(|e| connection_failed(descriptor, e))?;
            Ok::<_, ProviderError>(handle)
        };

        let handle = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| ProviderError::ConnectionFailed {
                connection_id: descriptor.connection_id.clone(),
                message: format!("timed out after {:?}", self.connect_timeout),
            })??;

        Ok(PooledConnection {
            descriptor: Arc::clone(descriptor),
            handle,
            created_at: Utc::now(),
        })
    }

    async fn acquire(
        self: &Arc<Self>,
        ctx: &RequestContext,
        descriptor: ConnectionDescriptor,
    ) -> ProviderResult<Connection> {
        let key = descriptor.connection_id.clone();
        let descriptor = Arc::new(descriptor);

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let slot = self.lease(&key).await;

            if let Some(pooled) = slot.cell.get() {
                if slot.is_expired(&self.config) {
                    tracing::info!(connection_id = %key, "cached connection expired, redialing");
                    self.evict(&key, &slot).await;
                    continue;
                }
                if pooled.handle.is_broken() {
                    tracing::warn!(connection_id = %key, "cached connection is broken, redialing");
                    self.evict(&key, &slot).await;
                    continue;
                }
                if slot.needs_refresh(&self.config) {
                    match ctx.run(pooled.handle.ping()).await {
                        Ok(()) => slot.touch(true),
                        Err(e @ (ProviderError::Cancelled | ProviderError::Timeout(_))) => return Err(e),
                        Err(e) => {
                            tracing::warn!(connection_id = %key, error = %e, "stale connection, redialing");
                            self.evict(&key, &slot).await;
                            continue;
                        }
                    }
                } else {
                    slot.touch(false);
                }
                tracing::debug!(connection_id = %key, "connection cache hit");
                return Ok(self.bind(pooled, ctx));
            }

            let dialed = ctx
                .run(slot.cell.get_or_try_init(|| self.dial_and_ping(&descriptor)))
                .await;
            return match dialed {
                Ok(pooled) => {
                    slot.touch(true);
                    Ok(self.bind(pooled, ctx))
                }
                Err(e) => {
                    self.release_failed(&key, slot).await;
                    Err(e)
                }
            };
        }

        Err(ProviderError::ConnectionFailed {
            connection_id: key,
            message: format!(
                "connection kept failing validation after {} attempts",
                MAX_ACQUIRE_ATTEMPTS
            ),
        })
    }

    fn bind(self: &Arc<Self>, pooled: &PooledConnection, ctx: &RequestContext) -> Connection {
        Connection::new(
            Arc::clone(&pooled.descriptor),
            Arc::clone(&pooled.handle),
            ctx.clone(),
            Arc::downgrade(self),
        )
    }
}

fn connection_failed(descriptor: &ConnectionDescriptor, err: ProviderError) -> ProviderError {
    match err {
        ProviderError::QueryFailed(message) => ProviderError::ConnectionFailed {
            connection_id: descriptor.connection_id.clone(),
            message,
        },
        other => other,
    }
}

/// Process-wide store of driver handles keyed by canonical connection id.
///
/// Created once per provider instance and shared by cloning. Concurrent first
/// requests for the same id coalesce into a single dial.
#[derive(Clone)]
pub struct ConnectionCache {
    inner: Arc<CacheInner>,
}

impl ConnectionCache {
    pub fn new(dialer: Arc<dyn Dialer>, config: CacheConfig, connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                dialer,
                config,
                connect_timeout,
                entries: RwLock::new(HashMap::new()),
                dials: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Resolve `connection_id` to a connection of the expected scope
    pub async fn connect(
        &self,
        ctx: &RequestContext,
        connection_id: &str,
        expect_server_scope: bool,
    ) -> ProviderResult<Connection> {
        let descriptor = ConnectionDescriptor::parse(connection_id)?;

        if descriptor.is_server_scope != expect_server_scope {
            return Err(ProviderError::ScopeMismatch {
                connection_id: connection_id.to_string(),
                expected: if expect_server_scope { "server" } else { "database" },
                actual: descriptor.scope_name(),
            });
        }

        self.inner.acquire(ctx, descriptor).await
    }

    /// Connect using whichever of `server` / `database` is set; exactly one must be
    pub async fn connect_server_or_database(
        &self,
        ctx: &RequestContext,
        server: &str,
        database: &str,
    ) -> ProviderResult<Connection> {
        match (server.is_empty(), database.is_empty()) {
            (false, true) => self.connect(ctx, server, true).await,
            (true, false) => self.connect(ctx, database, false).await,
            _ => Err(ProviderError::ConflictingScope {
                server: server.to_string(),
                database: database.to_string(),
            }),
        }
    }

    /// Drop the cached handle for `connection_id`, if any
    pub async fn invalidate(&self, connection_id: &str) -> bool {
        let key = ConnectionDescriptor::parse(connection_id)
            .map(|d| d.connection_id)
            .unwrap_or_else(|_| connection_id.to_string());
        self.inner.invalidate(&key).await
    }

    /// Evict every entry idle for longer than the expiry window, returning how many live ones went
    pub async fn purge_expired(&self) -> usize {
        let config = self.inner.config;
        let mut entries = self.inner.entries.write().await;
        let live = |entries: &HashMap<String, Arc<Slot>>| entries.values().filter(|s| s.cell.initialized()).count();
        let before = live(&*entries);
        entries.retain(|_, slot| {
            if slot.cell.initialized() {
                !slot.is_expired(&config)
            } else {
                !slot.is_abandoned()
            }
        });
        let purged = before - live(&*entries);
        if purged > 0 {
            tracing::info!(purged, "expired connections purged");
        }
        purged
    }

    pub async fn clear(&self) {
        self.inner.entries.write().await.clear();
    }

    /// Number of live (dialed) entries
    pub async fn len(&self) -> usize {
        let entries = self.inner.entries.read().await;
        entries.values().filter(|s| s.cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn entries(&self) -> Vec<CacheEntryInfo> {
        let entries = self.inner.entries.read().await;
        let mut infos: Vec<CacheEntryInfo> = entries
            .iter()
            .filter_map(|(id, slot)| {
                let pooled = slot.cell.get()?;
                let times = slot.times();
                Some(CacheEntryInfo {
                    connection_id: id.clone(),
                    created_at: pooled.created_at,
                    idle_for: times.last_used.elapsed(),
                    since_validated: times.last_validated.elapsed(),
                })
            })
            .collect();
        infos.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        infos
    }

    /// Entries in the map, dialed or not
    #[cfg(test)]
    async fn slot_count(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    /// Total dial attempts since construction
    pub fn dial_count(&self) -> u64 {
        self.inner.dials.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeDialer;

    fn cache_with(dialer: Arc<FakeDialer>, config: CacheConfig) -> ConnectionCache {
        ConnectionCache::new(dialer, config, Duration::from_secs(5))
    }

    fn long_lived() -> CacheConfig {
        CacheConfig {
            expire_after: Duration::from_secs(3600),
            refresh_after: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_second_connect_reuses_handle() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(Arc::clone(&dialer), long_lived());
        let ctx = RequestContext::new();

        let first = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        let second = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();

        assert!(first.same_handle(&second));
        assert_eq!(cache.dial_count(), 1);
        assert_eq!(dialer.ping_count(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_non_canonical_ids_share_an_entry() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(dialer, long_lived());
        let ctx = RequestContext::new();

        let a = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        let b = cache.connect(&ctx, "sqlserver::s:01433:db", false).await.unwrap();
        assert!(a.same_handle(&b));
        assert_eq!(b.connection_id(), "sqlserver::s:1433:db");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_connects_dial_once() {
        let dialer = Arc::new(FakeDialer::new().with_dial_delay(Duration::from_millis(50)));
        let cache = cache_with(Arc::clone(&dialer), long_lived());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .connect(&RequestContext::new(), "sqlserver::s:1433:db", false)
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let connections: Vec<Connection> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(cache.dial_count(), 1);
        assert_eq!(dialer.dial_count(), 1);
        assert!(connections.iter().all(|c| c.same_handle(&connections[0])));
    }

    #[tokio::test]
    async fn test_scope_mismatch_is_not_dialed() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(dialer, long_lived());
        let ctx = RequestContext::new();

        let err = cache.connect(&ctx, "sqlserver::s:1433", false).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected a database connection but received a server connection: 'sqlserver::s:1433'"
        );

        let err = cache.connect(&ctx, "sqlserver::s:1433:db", true).await.unwrap_err();
        assert!(matches!(err, ProviderError::ScopeMismatch { expected: "server", actual: "database", .. }));
        assert_eq!(cache.dial_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected_before_dialing() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(dialer, long_lived());
        let err = cache
            .connect(&RequestContext::new(), "sqlserver::s", true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConnectionId { .. }));
        assert_eq!(cache.dial_count(), 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_connect_server_or_database() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(dialer, long_lived());
        let ctx = RequestContext::new();

        let server = cache
            .connect_server_or_database(&ctx, "sqlserver::s:1433", "")
            .await
            .unwrap();
        assert!(server.is_server_scope());

        let database = cache
            .connect_server_or_database(&ctx, "", "sqlserver::s:1433:db")
            .await
            .unwrap();
        assert!(!database.is_server_scope());

        for (s, d) in [("", ""), ("sqlserver::s:1433", "sqlserver::s:1433:db")] {
            let err = cache.connect_server_or_database(&ctx, s, d).await.unwrap_err();
            assert!(matches!(err, ProviderError::ConflictingScope { .. }));
        }
    }

    #[tokio::test]
    async fn test_dial_failure_is_surfaced_and_not_cached() {
        let dialer = Arc::new(FakeDialer::new());
        dialer.fail_dials(true);
        let cache = cache_with(Arc::clone(&dialer), long_lived());
        let ctx = RequestContext::new();

        let err = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap_err();
        assert!(matches!(err, ProviderError::ConnectionFailed { .. }));
        assert!(err.is_retryable());
        assert!(cache.is_empty().await);

        dialer.fail_dials(false);
        cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert_eq!(cache.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_ping_failure_on_dial_is_not_swallowed() {
        let dialer = Arc::new(FakeDialer::new());
        dialer.fail_pings(true);
        let cache = cache_with(dialer, long_lived());

        let err = cache
            .connect(&RequestContext::new(), "sqlserver::s:1433:db", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ConnectionFailed { .. }));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_broken_handle_is_redialed() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(Arc::clone(&dialer), long_lived());
        let ctx = RequestContext::new();

        let first = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        dialer.last_handle().unwrap().break_handle();

        let second = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert!(!first.same_handle(&second));
        assert_eq!(cache.dial_count(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_handle_is_revalidated_after_refresh_window() {
        let dialer = Arc::new(FakeDialer::new());
        let config = CacheConfig {
            expire_after: Duration::from_secs(3600),
            refresh_after: Duration::from_millis(20),
        };
        let cache = cache_with(Arc::clone(&dialer), config);
        let ctx = RequestContext::new();

        let first = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // still healthy: one extra ping, same handle
        let second = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert!(first.same_handle(&second));
        assert_eq!(dialer.ping_count(), 2);

        // closed out-of-band: ping fails, transparently redialed
        tokio::time::sleep(Duration::from_millis(40)).await;
        dialer.last_handle().unwrap().fail_pings(true);
        let third = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert!(!first.same_handle(&third));
        assert_eq!(cache.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted() {
        let dialer = Arc::new(FakeDialer::new());
        let config = CacheConfig {
            expire_after: Duration::from_millis(30),
            refresh_after: Duration::from_millis(10),
        };
        let cache = cache_with(Arc::clone(&dialer), config);
        let ctx = RequestContext::new();

        let first = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        cache.connect(&ctx, "sqlserver::s:1433", true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.purge_expired().await, 2);
        assert!(cache.is_empty().await);

        let second = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert!(!first.same_handle(&second));
        assert_eq!(cache.dial_count(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_forces_redial() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(dialer, long_lived());
        let ctx = RequestContext::new();

        cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert!(cache.invalidate("sqlserver::s:01433:db").await);
        assert!(!cache.invalidate("sqlserver::s:1433:db").await);
        cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap();
        assert_eq!(cache.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_dial_keeps_one_handle() {
        let dialer = Arc::new(FakeDialer::new().with_dial_delay(Duration::from_millis(100)));
        let cache = cache_with(Arc::clone(&dialer), long_lived());

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .connect(&RequestContext::new(), "sqlserver::s:1433:db", false)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!cache.invalidate("sqlserver::s:1433:db").await);
        let second = cache
            .connect(&RequestContext::new(), "sqlserver::s:1433:db", false)
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.same_handle(&second));
        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_dial_removes_its_slot() {
        let dialer = Arc::new(FakeDialer::new());
        dialer.fail_dials(true);
        let cache = cache_with(dialer, long_lived());

        let _ = cache
            .connect(&RequestContext::new(), "sqlserver::s:1433:db", false)
            .await;
        assert_eq!(cache.slot_count().await, 0);
    }

    #[tokio::test]
    async fn test_purge_drops_abandoned_slots_only() {
        let dialer = Arc::new(FakeDialer::new().with_dial_delay(Duration::from_millis(100)));
        let cache = cache_with(dialer, long_lived());

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .connect(&RequestContext::new(), "sqlserver::s:1433:db", false)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.purge_expired().await, 0);
        assert_eq!(cache.slot_count().await, 1);
        pending.await.unwrap().unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_dial_leaves_cache_untouched() {
        let dialer = Arc::new(FakeDialer::new().with_dial_delay(Duration::from_secs(5)));
        let cache = cache_with(Arc::clone(&dialer), long_lived());
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = cache.connect(&ctx, "sqlserver::s:1433:db", false).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert!(cache.is_empty().await);
        assert!(cache.entries().await.is_empty());
        assert_eq!(cache.slot_count().await, 0);
    }

    #[tokio::test]
    async fn test_dial_timeout() {
        let dialer = Arc::new(FakeDialer::new().with_dial_delay(Duration::from_secs(5)));
        let cache = ConnectionCache::new(dialer, long_lived(), Duration::from_millis(20));
        let err = cache
            .connect(&RequestContext::new(), "sqlserver::s:1433:db", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ConnectionFailed { ref message, .. } if message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_entries_report_live_connections() {
        let dialer = Arc::new(FakeDialer::new());
        let cache = cache_with(dialer, long_lived());
        let ctx = RequestContext::new();
        cache.connect(&ctx, "sqlserver::b:1433:db", false).await.unwrap();
        cache.connect(&ctx, "sqlserver::a:1433", true).await.unwrap();

        let ids: Vec<_> = cache.entries().await.into_iter().map(|e| e.connection_id).collect();
        assert_eq!(ids, vec!["sqlserver::a:1433", "sqlserver::b:1433:db"]);
    }
}
