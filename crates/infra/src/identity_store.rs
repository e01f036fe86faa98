use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bastion_auth::{Identity, IdentityField, IdentityStore, StoreError};
use bastion_core::IdentityId;

#[derive(Debug, Default)]
struct Staged {
    puts: HashMap<IdentityId, Identity>,
    removes: HashSet<IdentityId>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.removes.is_empty()
    }
}

/// In-memory identity datastore.
///
/// Writes are staged and become durable on `commit` or are dropped by
/// `rollback`; `find` sees staged writes immediately (read-your-writes within
/// the unit of work). There is one staging buffer per store, so callers must
/// run at most one unit of work at a time. Intended for tests/dev and
/// single-process deployments.
///
/// `set_unavailable` and `fail_commits` simulate a backend outage.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    committed: RwLock<HashMap<IdentityId, Identity>>,
    staged: RwLock<Staged>,
    unavailable: AtomicBool,
    fail_commits: AtomicBool,
    commits: AtomicU64,
    commit_calls: AtomicU64,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert directly as committed state (fixtures, bootstrap users).
    pub fn seed(&self, identity: Identity) -> Result<(), StoreError> {
        let mut committed = self.committed.write().map_err(|_| poisoned())?;
        committed.insert(identity.id, identity);
        Ok(())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of commits that actually persisted staged changes.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.staged.read().map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Number of `commit` calls, including empty and failed ones.
    pub fn commit_calls(&self) -> u64 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Committed identity by id, ignoring staged writes.
    pub fn committed(&self, id: IdentityId) -> Option<Identity> {
        self.committed.read().ok()?.get(&id).cloned()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("identity store unavailable".to_string()));
        }
        Ok(())
    }

    /// Current view: committed rows overlaid with staged puts and removes.
    fn visible(&self) -> Result<HashMap<IdentityId, Identity>, StoreError> {
        let committed = self.committed.read().map_err(|_| poisoned())?;
        let staged = self.staged.read().map_err(|_| poisoned())?;

        let mut view: HashMap<IdentityId, Identity> = committed
            .iter()
            .filter(|(id, _)| !staged.removes.contains(id))
            .map(|(id, identity)| (*id, identity.clone()))
            .collect();
        view.extend(staged.puts.iter().map(|(id, identity)| (*id, identity.clone())));
        Ok(view)
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl IdentityStore for InMemoryIdentityStore {
    fn find(&self, field: IdentityField<'_>) -> Result<Identity, StoreError> {
        self.check_available()?;

        if let IdentityField::Id(id) = field {
            let staged = self.staged.read().map_err(|_| poisoned())?;
            if staged.removes.contains(&id) {
                return Err(StoreError::NotFound);
            }
            if let Some(identity) = staged.puts.get(&id) {
                return Ok(identity.clone());
            }
            drop(staged);
            return self
                .committed
                .read()
                .map_err(|_| poisoned())?
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound);
        }

        let view = self.visible()?;
        let found = view.into_values().find(|identity| match field {
            IdentityField::Email(email) => identity.email.eq_ignore_ascii_case(email.trim()),
            IdentityField::AuthenticationToken(token) => identity.authentication_token.as_deref() == Some(token),
            IdentityField::Id(_) => false,
        });
        found.ok_or(StoreError::NotFound)
    }

    fn put(&self, identity: Identity) -> Result<(), StoreError> {
        self.check_available()?;

        let duplicate = self
            .visible()?
            .values()
            .any(|other| other.id != identity.id && other.email == identity.email);
        if duplicate {
            return Err(StoreError::Conflict(format!("email already registered: {}", identity.email)));
        }

        let mut staged = self.staged.write().map_err(|_| poisoned())?;
        staged.removes.remove(&identity.id);
        staged.puts.insert(identity.id, identity);
        Ok(())
    }

    fn remove(&self, id: IdentityId) -> Result<(), StoreError> {
        self.check_available()?;
        let mut staged = self.staged.write().map_err(|_| poisoned())?;
        staged.puts.remove(&id);
        staged.removes.insert(id);
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("commit rejected".to_string()));
        }

        let mut staged = self.staged.write().map_err(|_| poisoned())?;
        if staged.is_empty() {
            return Ok(());
        }

        let mut committed = self.committed.write().map_err(|_| poisoned())?;
        let Staged { puts, removes } = std::mem::take(&mut *staged);
        for id in removes {
            committed.remove(&id);
        }
        committed.extend(puts);

        self.commits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(rows = committed.len(), "identity store committed");
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        let mut staged = self.staged.write().map_err(|_| poisoned())?;
        if !staged.is_empty() {
            tracing::debug!(puts = staged.puts.len(), removes = staged.removes.len(), "identity store rolled back");
        }
        *staged = Staged::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joe() -> Identity {
        Identity::new(IdentityId::new(), "joe@lp.com").with_authentication_token("123abc")
    }

    #[test]
    fn staged_writes_are_visible_before_commit() {
        let store = InMemoryIdentityStore::new();
        let identity = joe();
        store.put(identity.clone()).unwrap();

        assert_eq!(store.find(IdentityField::Id(identity.id)).unwrap(), identity);
        assert!(store.committed(identity.id).is_none());
        assert!(store.has_pending_changes());

        store.commit().unwrap();
        assert_eq!(store.committed(identity.id), Some(identity));
        assert_eq!(store.commit_count(), 1);
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn empty_commit_is_not_counted() {
        let store = InMemoryIdentityStore::new();
        store.commit().unwrap();
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn lookups_by_email_and_token() {
        let store = InMemoryIdentityStore::new();
        let identity = joe();
        store.seed(identity.clone()).unwrap();

        assert_eq!(store.find(IdentityField::Email("Joe@LP.com")).unwrap().id, identity.id);
        assert_eq!(store.find(IdentityField::AuthenticationToken("123abc")).unwrap().id, identity.id);
        assert_eq!(store.find(IdentityField::AuthenticationToken("123ABC")), Err(StoreError::NotFound));
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let store = InMemoryIdentityStore::new();
        store.seed(joe()).unwrap();
        let err = store.put(Identity::new(IdentityId::new(), "joe@lp.com")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn removal_is_staged_then_committed() {
        let store = InMemoryIdentityStore::new();
        let identity = joe();
        store.seed(identity.clone()).unwrap();

        store.remove(identity.id).unwrap();
        assert_eq!(store.find(IdentityField::Id(identity.id)), Err(StoreError::NotFound));
        assert!(store.committed(identity.id).is_some());

        store.rollback().unwrap();
        assert!(store.find(IdentityField::Id(identity.id)).is_ok());

        store.remove(identity.id).unwrap();
        store.commit().unwrap();
        assert!(store.committed(identity.id).is_none());
    }

    #[test]
    fn outage_and_commit_failures_surface_as_backend_errors() {
        let store = InMemoryIdentityStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.find(IdentityField::Email("joe@lp.com")), Err(StoreError::Backend(_))));
        store.set_unavailable(false);

        store.put(joe()).unwrap();
        store.fail_commits(true);
        assert!(matches!(store.commit(), Err(StoreError::Backend(_))));
        assert!(store.has_pending_changes());
    }

    #[test]
    fn rollback_hides_staged_writes_and_keeps_committed_rows() {
        let store = InMemoryIdentityStore::new();
        let kept = joe();
        store.seed(kept.clone()).unwrap();

        let dropped = Identity::new(IdentityId::new(), "dude@lp.com");
        store.put(dropped.clone()).unwrap();
        store.fail_commits(true);
        assert!(store.commit().is_err());

        store.rollback().unwrap();
        assert!(!store.has_pending_changes());
        assert_eq!(store.find(IdentityField::Email("dude@lp.com")), Err(StoreError::NotFound));
        assert_eq!(store.find(IdentityField::Id(kept.id)).unwrap(), kept);

        // A later successful commit has nothing of the dropped write to persist.
        store.fail_commits(false);
        store.commit().unwrap();
        assert!(store.committed(dropped.id).is_none());
        assert_eq!(store.commit_count(), 0);
        assert_eq!(store.commit_calls(), 2);
    }
}
