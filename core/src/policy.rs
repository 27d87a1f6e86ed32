//! Policy store. The single source of the tier table and rule knobs.
//!
//! RULE: every engine invocation takes ONE snapshot up front and uses it
//! for its whole duration. Publishing a new policy never changes a
//! snapshot that is already in use.

use crate::{
    config::PolicyConfig,
    error::{LedgerError, LedgerResult},
    store::LedgerStore,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub version: u64,
    pub config: PolicyConfig,
}

#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Option<Arc<PolicySnapshot>>>,
}

impl PolicyStore {
    /// A store with nothing published. `snapshot()` fails until `publish()`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_config(config: PolicyConfig) -> LedgerResult<Self> {
        let store = Self::empty();
        store.publish(config)?;
        Ok(store)
    }

    /// Validate and install a new policy. Returns the new snapshot.
    pub fn publish(&self, config: PolicyConfig) -> LedgerResult<Arc<PolicySnapshot>> {
        config.validate()?;
        let mut current = self
            .current
            .write()
            .map_err(|_| LedgerError::PolicyUnavailable)?;
        let version = current.as_ref().map_or(1, |s| s.version + 1);
        let snapshot = Arc::new(PolicySnapshot { version, config });
        *current = Some(Arc::clone(&snapshot));
        log::info!("Policy version {version} published");
        Ok(snapshot)
    }

    /// Publish and keep a copy of the document in the store's policy history.
    pub fn publish_recorded(
        &self,
        config: PolicyConfig,
        store: &LedgerStore,
        now: DateTime<Utc>,
    ) -> LedgerResult<Arc<PolicySnapshot>> {
        let snapshot = self.publish(config)?;
        store.insert_policy_version(
            snapshot.version,
            &serde_json::to_string(&snapshot.config)?,
            now,
        )?;
        Ok(snapshot)
    }

    /// The current snapshot. Fails with `PolicyUnavailable`; never falls back to defaults.
    pub fn snapshot(&self) -> LedgerResult<Arc<PolicySnapshot>> {
        self.current
            .read()
            .map_err(|_| LedgerError::PolicyUnavailable)?
            .clone()
            .ok_or(LedgerError::PolicyUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_is_unavailable() {
        let store = PolicyStore::empty();
        assert!(matches!(store.snapshot(), Err(LedgerError::PolicyUnavailable)));
    }

    #[test]
    fn held_snapshot_survives_republish() {
        let store = PolicyStore::with_config(PolicyConfig::default_test()).unwrap();
        let held = store.snapshot().unwrap();

        let mut changed = PolicyConfig::default_test();
        changed.tiers[0].rate_bps = 150;
        store.publish(changed).unwrap();

        assert_eq!(held.version, 1);
        assert_eq!(held.config.tiers[0].rate_bps, 100);
        let fresh = store.snapshot().unwrap();
        assert_eq!(fresh.version, 2);
        assert_eq!(fresh.config.tiers[0].rate_bps, 150);
    }

    #[test]
    fn invalid_policy_is_not_published() {
        let store = PolicyStore::with_config(PolicyConfig::default_test()).unwrap();
        let mut broken = PolicyConfig::default_test();
        broken.tiers.clear();
        assert!(store.publish(broken).is_err());
        assert_eq!(store.snapshot().unwrap().version, 1);
    }
}
