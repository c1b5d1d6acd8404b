//! Per-product operation guard.
//!
//! A product id is held while a mutating cart operation on it is in flight.
//! A second operation on the same id is rejected rather than queued; the
//! caller re-issues it once the first completes. Holding is scoped: the
//! [`GuardPermit`] returned by [`OperationGuard::try_acquire`] releases the id
//! when dropped, so early returns, `?` and panics all release it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cartkeeper_core::ProductId;
use tracing::trace;

/// Set of product ids with an operation in flight.
#[derive(Debug, Clone, Default)]
pub struct OperationGuard {
    held: Arc<Mutex<HashSet<ProductId>>>,
}

impl OperationGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<ProductId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold `id`, or return `None` if it is already held.
    #[must_use]
    pub fn try_acquire(&self, id: &ProductId) -> Option<GuardPermit> {
        if !self.held().insert(id.clone()) {
            trace!(product_id = %id, "Guard busy");
            return None;
        }
        Some(GuardPermit {
            guard: self.clone(),
            ids: vec![id.clone()],
        })
    }

    /// Hold every id in `ids` at once, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the first id that is already held.
    pub fn try_acquire_all(&self, ids: &[ProductId]) -> Result<GuardPermit, ProductId> {
        let mut held = self.held();
        if let Some(busy) = ids.iter().find(|id| held.contains(*id)) {
            return Err(busy.clone());
        }
        let mut acquired = Vec::with_capacity(ids.len());
        for id in ids {
            if held.insert(id.clone()) {
                acquired.push(id.clone());
            }
        }
        drop(held);
        Ok(GuardPermit {
            guard: self.clone(),
            ids: acquired,
        })
    }

    /// Stop holding `id`. Releasing an id that is not held does nothing.
    pub fn release(&self, id: &ProductId) {
        self.held().remove(id);
    }

    /// Whether an operation on `id` is in flight.
    #[must_use]
    pub fn is_held(&self, id: &ProductId) -> bool {
        self.held().contains(id)
    }

    /// Number of ids currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held().len()
    }
}

/// Scoped hold on one or more product ids.
#[derive(Debug)]
#[must_use = "the ids are released as soon as the permit is dropped"]
pub struct GuardPermit {
    guard: OperationGuard,
    ids: Vec<ProductId>,
}

impl GuardPermit {
    /// Ids held by this permit.
    #[must_use]
    pub fn ids(&self) -> &[ProductId] {
        &self.ids
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        for id in &self.ids {
            self.guard.release(id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let guard = OperationGuard::new();
        let id = ProductId::new("a");

        let permit = guard.try_acquire(&id).unwrap();
        assert!(guard.is_held(&id));
        assert!(guard.try_acquire(&id).is_none());

        drop(permit);
        assert!(!guard.is_held(&id));
        assert!(guard.try_acquire(&id).is_some());
    }

    #[test]
    fn test_different_ids_are_independent() {
        let guard = OperationGuard::new();
        let _a = guard.try_acquire(&ProductId::new("a")).unwrap();
        let _b = guard.try_acquire(&ProductId::new("b")).unwrap();
        assert_eq!(guard.held_count(), 2);
    }

    #[test]
    fn test_release_on_early_return() {
        fn failing(guard: &OperationGuard, id: &ProductId) -> Result<(), &'static str> {
            let _permit = guard.try_acquire(id).ok_or("busy")?;
            Err("remote failure")
        }

        let guard = OperationGuard::new();
        let id = ProductId::new("a");
        assert_eq!(failing(&guard, &id), Err("remote failure"));
        assert!(!guard.is_held(&id));
    }

    #[test]
    fn test_release_on_panic() {
        let guard = OperationGuard::new();
        let id = ProductId::new("a");

        let cloned = guard.clone();
        let cloned_id = id.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire(&cloned_id).unwrap();
            panic!("operation blew up");
        });

        assert!(result.is_err());
        assert!(!guard.is_held(&id));
    }

    #[test]
    fn test_acquire_all_is_all_or_nothing() {
        let guard = OperationGuard::new();
        let a = ProductId::new("a");
        let b = ProductId::new("b");
        let held_b = guard.try_acquire(&b).unwrap();

        let busy = guard.try_acquire_all(&[a.clone(), b.clone()]).unwrap_err();
        assert_eq!(busy, b);
        assert!(!guard.is_held(&a));

        drop(held_b);
        let permit = guard.try_acquire_all(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(permit.ids().len(), 2);
        drop(permit);
        assert_eq!(guard.held_count(), 0);
    }

    #[test]
    fn test_explicit_release() {
        let guard = OperationGuard::new();
        let id = ProductId::new("a");
        let permit = guard.try_acquire(&id).unwrap();

        guard.release(&id);
        assert!(!guard.is_held(&id));
        // Dropping the permit afterwards is harmless
        drop(permit);
        assert!(!guard.is_held(&id));
    }
}
