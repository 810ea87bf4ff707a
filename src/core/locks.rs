//! In-process target locks.
//!
//! At most one transaction operates on a target entity at a time. A request
//! is granted or denied immediately; there is no waiting.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Lock table keyed by target entity, valued by owning request id
#[derive(Debug, Default)]
pub struct TargetLocks {
    owners: DashMap<String, Uuid>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant the lock if free or already held by `owner`
    pub fn try_lock(&self, entity: &str, owner: Uuid) -> bool {
        match self.owners.entry(entity.to_string()) {
            Entry::Occupied(held) => *held.get() == owner,
            Entry::Vacant(slot) => {
                slot.insert(owner);
                debug!(target_entity = %entity, request_id = %owner, "lock granted");
                true
            }
        }
    }

    /// Release every lock held by `owner`
    pub fn unlock_all(&self, owner: Uuid) {
        self.owners.retain(|_, held| *held != owner);
    }

    pub fn owner(&self, entity: &str) -> Option<Uuid> {
        self.owners.get(entity).map(|r| *r)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_reentrant() {
        let locks = TargetLocks::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(locks.try_lock("vnf-1", a));
        assert!(locks.try_lock("vnf-1", a));
        assert!(!locks.try_lock("vnf-1", b));
        assert_eq!(locks.owner("vnf-1"), Some(a));

        locks.unlock_all(a);
        assert!(locks.is_empty());
        assert!(locks.try_lock("vnf-1", b));
    }
}
