// Database Module
// Connection descriptors, the per-connection-id handle cache and the driver seam

pub mod cache;
pub mod connection;
pub mod context;
pub mod drivers;
pub mod traits;

#[cfg(test)]
pub(crate) mod fake;

pub use cache::{CacheEntryInfo, ConnectionCache, PooledConnection};
pub use connection::{Connection, ConnectionDescriptor, ProviderKind};
pub use context::RequestContext;
pub use drivers::{MssqlAuth, MssqlDialer};
pub use traits::{CellValue, Dialer, Param, Record, SqlHandle, TokenSource};
