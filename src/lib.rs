// Azure SQL provider core
// Connection resolution, resource identity and create-then-verify reconciliation for SQL Server,
// Azure SQL, Synapse and Fabric endpoints

pub mod config;
pub mod db;
pub mod diagnostics;
pub mod entities;
pub mod error;
pub mod logging;
pub mod provider;
pub mod reconcile;
pub mod resource_id;

pub use config::{CacheConfig, ProviderConfig};
pub use db::{Connection, ConnectionCache, ConnectionDescriptor, ProviderKind, RequestContext};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{ErrorClass, ProviderError, ProviderResult};
pub use provider::Provider;
pub use reconcile::{ReconcileOutcome, Snapshot};
pub use resource_id::{EntityKind, ResourceId};
