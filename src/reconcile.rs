// Create-then-verify reconciliation
// Every mutation is followed by an authoritative read-back; the pair decides the outcome

use std::future::Future;

use crate::error::{ProviderError, ProviderResult};
use crate::resource_id::{EntityKind, ResourceId};

/// Entity snapshots expose their composite id so failures can name it
pub trait Snapshot {
    fn resource_id(&self) -> &ResourceId;
}

/// Terminal states of a create
#[derive(Debug)]
pub enum ReconcileOutcome<T> {
    /// The statement succeeded and the object was read back
    Verified(T),
    /// The statement failed but the object exists anyway
    AmbiguousExists { id: String, error: ProviderError },
    /// The statement succeeded but the object could not be read back
    ConsistencyFault(String),
    /// The statement failed and nothing was created
    Failed(ProviderError),
}

impl<T: Snapshot> ReconcileOutcome<T> {
    /// Decide the outcome from the statement result and the read-back result
    pub fn classify(
        kind: EntityKind,
        name: &str,
        ddl: ProviderResult<u64>,
        read_back: ProviderResult<Option<T>>,
    ) -> Self {
        match (ddl, read_back) {
            (Ok(_), Ok(Some(snapshot))) => ReconcileOutcome::Verified(snapshot),
            (Ok(_), Ok(None)) => ReconcileOutcome::ConsistencyFault(format!(
                "unable to read newly created {} '{}'",
                kind, name
            )),
            (Ok(_), Err(read_err)) => ReconcileOutcome::ConsistencyFault(format!(
                "unable to read newly created {} '{}': {}",
                kind, name, read_err
            )),
            (Err(error), Ok(Some(snapshot))) => ReconcileOutcome::AmbiguousExists {
                id: snapshot.resource_id().to_string(),
                error,
            },
            (Err(error), Ok(None)) => ReconcileOutcome::Failed(error),
            (Err(error), Err(read_err)) => {
                tracing::debug!(error = %read_err, "read-back after failed create also failed");
                ReconcileOutcome::Failed(error)
            }
        }
    }

    pub fn into_result(self, kind: EntityKind) -> ProviderResult<T> {
        match self {
            ReconcileOutcome::Verified(snapshot) => Ok(snapshot),
            ReconcileOutcome::AmbiguousExists { id, error } => {
                tracing::warn!(kind = %kind, id = %id, "object exists after failed create");
                Err(ProviderError::AlreadyExists {
                    kind: kind.label(),
                    id,
                    source: Box::new(error),
                })
            }
            ReconcileOutcome::ConsistencyFault(message) => {
                tracing::error!(kind = %kind, "{}", message);
                Err(ProviderError::ConsistencyFault(message))
            }
            ReconcileOutcome::Failed(error) => Err(error),
        }
    }
}

/// Run `ddl`, then read the object back by its natural key regardless of the statement's outcome
pub async fn create_then_verify<T, D, R, RFut>(
    kind: EntityKind,
    name: &str,
    ddl: D,
    read_back: R,
) -> ProviderResult<T>
where
    T: Snapshot,
    D: Future<Output = ProviderResult<u64>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = ProviderResult<Option<T>>>,
{
    tracing::info!(kind = %kind, name, "creating");
    let ddl_result = ddl.await;
    let read_result = read_back().await;
    ReconcileOutcome::classify(kind, name, ddl_result, read_result).into_result(kind)
}

/// Run an in-place update and re-read the mutated object
pub async fn update_then_verify<T, D, R, RFut>(
    kind: EntityKind,
    id: &ResourceId,
    ddl: D,
    read_back: R,
) -> ProviderResult<T>
where
    D: Future<Output = ProviderResult<u64>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = ProviderResult<Option<T>>>,
{
    tracing::info!(kind = %kind, id = %id, "updating");
    ddl.await?;
    match read_back().await {
        Ok(Some(snapshot)) => Ok(snapshot),
        Ok(None) => {
            let message = format!("{} '{}' disappeared while being updated", kind, id);
            tracing::error!("{}", message);
            Err(ProviderError::ConsistencyFault(message))
        }
        Err(e) => Err(ProviderError::ConsistencyFault(format!(
            "unable to read {} '{}' after update: {}",
            kind, id, e
        ))),
    }
}

/// Drop an object idempotently: absent before is success, present after is a fault
pub async fn delete_then_verify<T, R, RFut, D, DFut>(
    kind: EntityKind,
    key: &str,
    read: R,
    ddl: D,
) -> ProviderResult<()>
where
    R: Fn() -> RFut,
    RFut: Future<Output = ProviderResult<Option<T>>>,
    D: FnOnce() -> DFut,
    DFut: Future<Output = ProviderResult<u64>>,
{
    if read().await?.is_none() {
        tracing::debug!(kind = %kind, key, "already absent");
        return Ok(());
    }

    tracing::info!(kind = %kind, key, "dropping");
    let ddl_result = ddl().await;

    match (ddl_result, read().await) {
        (Ok(_), Ok(None)) => Ok(()),
        (Err(e), Ok(None)) => {
            tracing::warn!(kind = %kind, key, error = %e, "drop failed but object is gone");
            Ok(())
        }
        (Ok(_), Ok(Some(_))) => {
            let message = format!("{} '{}' still exists after drop", kind, key);
            tracing::error!("{}", message);
            Err(ProviderError::ConsistencyFault(message))
        }
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
    }
}
