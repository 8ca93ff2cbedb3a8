//! Agent personas and the cache that owns them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use callsim_model::AgentHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

/// A persona registered with the model service, bound to a system
/// instruction string and a model.
///
/// Personas are read-only once created and shared as `Arc<AgentPersona>`
/// between simulations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPersona {
    /// The logical agent this persona was created for.
    pub agent_id: String,
    /// The display name copied from the agent configuration.
    pub display_name: String,
    /// Starts at 1 and grows each time the persona is recreated after an
    /// invalidation.
    pub version: u32,
    /// The handle issued by the model service.
    pub handle: AgentHandle,
    /// When the persona was created.
    pub created_at: DateTime<Utc>,
}

impl AgentPersona {
    /// Returns the model the persona is bound to.
    #[inline]
    pub fn model(&self) -> &str {
        &self.handle.model
    }
}

struct Slot {
    version: u32,
    cell: Arc<OnceCell<Arc<AgentPersona>>>,
}

impl Slot {
    fn new(version: u32) -> Self {
        Self {
            version,
            cell: Arc::new(OnceCell::new()),
        }
    }
}

/// A concurrent cache of personas keyed by agent identifier.
///
/// Lookups only hold the map lock long enough to fetch the slot of an
/// agent. Creation is awaited on the slot itself, so concurrent callers
/// asking for the same uncached agent wait for a single creation instead
/// of racing each other. A failed creation leaves the slot empty and the
/// next caller tries again.
#[derive(Default)]
pub struct PersonaCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl PersonaCache {
    /// Creates an empty cache.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached persona for `agent_id`, or runs `create` to make
    /// one. `create` receives the version the new persona should carry.
    pub async fn get_or_create<F, Fut, E>(
        &self,
        agent_id: &str,
        create: F,
    ) -> Result<Arc<AgentPersona>, E>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<AgentPersona, E>>,
    {
        let (version, cell) = {
            let mut slots = self.slots();
            let slot = slots
                .entry(agent_id.to_owned())
                .or_insert_with(|| Slot::new(1));
            (slot.version, Arc::clone(&slot.cell))
        };

        cell.get_or_try_init(move || {
            let fut = create(version);
            async move { fut.await.map(Arc::new) }
        })
        .await
        .cloned()
    }

    /// Returns the cached persona for `agent_id` without creating one.
    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentPersona>> {
        self.slots()
            .get(agent_id)
            .and_then(|slot| slot.cell.get().cloned())
    }

    /// Drops the cached persona for `agent_id`, so that the next lookup
    /// creates a new version. Returns `false` if nothing was cached.
    ///
    /// Simulations holding the old persona keep using it.
    pub fn invalidate(&self, agent_id: &str) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(agent_id) else {
            return false;
        };
        if !slot.cell.initialized() {
            return false;
        }
        *slot = Slot::new(slot.version + 1);
        true
    }

    /// Returns the number of cached personas.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    /// Returns `true` if no persona is cached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn persona(agent_id: &str, version: u32) -> AgentPersona {
        AgentPersona {
            agent_id: agent_id.to_owned(),
            display_name: agent_id.to_owned(),
            version,
            handle: AgentHandle {
                id: format!("{agent_id}:{version}"),
                name: agent_id.to_owned(),
                model: "test".to_owned(),
                instructions: String::new(),
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_once() {
        let cache = PersonaCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let p = cache
                .get_or_create("C1", |version| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, ()>(persona("C1", version)) }
                })
                .await
                .unwrap();
            assert_eq!(p.version, 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_is_not_cached() {
        let cache = PersonaCache::new();
        let err = cache
            .get_or_create("C1", |_| async { Err::<AgentPersona, _>("down") })
            .await
            .unwrap_err();
        assert_eq!(err, "down");
        assert!(cache.get("C1").is_none());
        assert!(cache.is_empty());

        let p = cache
            .get_or_create("C1", |version| async move {
                Ok::<_, &str>(persona("C1", version))
            })
            .await
            .unwrap();
        assert_eq!(p.version, 1);
    }

    #[tokio::test]
    async fn test_invalidate_bumps_version() {
        let cache = PersonaCache::new();
        assert!(!cache.invalidate("C1"));

        let first = cache
            .get_or_create("C1", |version| async move {
                Ok::<_, ()>(persona("C1", version))
            })
            .await
            .unwrap();
        assert!(cache.invalidate("C1"));
        assert!(cache.get("C1").is_none());

        let second = cache
            .get_or_create("C1", |version| async move {
                Ok::<_, ()>(persona("C1", version))
            })
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
