use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::ShelterResult;
use crate::store::{Session, Store, UnitFuture};

/// Runs each cross-entity transition (a lifecycle write plus a ledger
/// write) as one atomic unit: both are kept or both are discarded.
///
/// One user-facing operation maps to at most one unit; units never nest.
pub struct Coordinator<S> {
    store: Arc<S>,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> Coordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Executes `unit` inside a storage transaction, committing on `Ok` and
    /// rolling back on `Err`. The unit's own error is returned unchanged.
    pub async fn run_atomic<T, F>(&self, operation: &'static str, unit: F) -> ShelterResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnOnce(&'s mut dyn Session) -> UnitFuture<'s, T> + Send + 'static,
    {
        let span = info_span!("atomic_unit", operation);
        let result = self.store.atomic(unit).instrument(span).await;
        if let Err(err) = &result {
            if err.is_business_rule() {
                debug!(operation, code = err.code(), "Atomic unit rejected: {}", err);
            } else {
                warn!(operation, "Atomic unit aborted: {}", err);
            }
        }
        result
    }
}
