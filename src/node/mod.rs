//! Cached storage for queries and inputs (*nodes*).
//!
//! One node family holds every cached value of one registered query or
//! input: the family is addressed by its identity token, the values inside
//! it by parameter tuple. Families of heterogeneous signatures live in one
//! registry by hiding behind the narrow [`QueryNode`]/[`InputNode`] traits;
//! the typed view is restored by downcast at call sites where the
//! signature is statically known.
//!
//! Structural changes (registering a family, installing an entry, the
//! in-place bookkeeping updates on existing entries) happen under the
//! runtime's store lock or the owning family/entry lock. No lock is ever
//! held while a user query function runs.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::QueryResult;
use crate::key::{DynParams, InputId, NodeKey, QueryId};
use crate::runtime::clock::Clock;
use crate::runtime::QueryContext;
use crate::time::Revision;
use crate::Stashable;

pub mod input;
pub mod query;

use input::InputStorage;

/// Erased surface of one query family's storage.
pub(crate) trait QueryNode: Send + Sync {
    /// Restore the typed view.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Run the memoized lookup for `params` and report the revision at
    /// which the cached value last changed.
    fn changed_at(&self, cx: &QueryContext<'_>, params: &DynParams) -> QueryResult<Revision>;

    /// Parameter packs of all currently cached entries.
    fn cached_params(&self) -> Vec<DynParams>;

    /// Upstream edges of the entry cached for `params`, if present.
    fn upstream_of(&self, params: &DynParams) -> Option<Vec<NodeKey>>;
}

/// Erased surface of one input family's storage.
pub(crate) trait InputNode: Send + Sync {
    /// Restore the typed view.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Revision at which the value under `params` last changed, or `None`
    /// when no such entry exists.
    fn changed_at(&self, params: &DynParams) -> Option<Revision>;
}

/// Central cached state of a runtime: the revision clock plus the per-family
/// storage registries.
pub(crate) struct Store {
    pub clock: Clock,
    pub queries: HashMap<QueryId, Arc<dyn QueryNode>>,
    pub inputs: HashMap<InputId, Arc<dyn InputNode>>,
}

impl Store {
    pub fn new() -> Store {
        Store {
            clock: Clock::new(),
            queries: HashMap::new(),
            inputs: HashMap::new(),
        }
    }

    /// Typed storage of the input family `id`, creating the family on
    /// first use.
    pub fn input_storage_or_insert<Params, Value>(
        &mut self,
        id: InputId,
    ) -> Arc<InputStorage<Params, Value>>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        let slot = self
            .inputs
            .entry(id)
            .or_insert_with(|| Arc::new(InputStorage::<Params, Value>::new(id)));

        slot.clone()
            .as_any_arc()
            .downcast()
            .expect("input family should be reused with one signature only")
    }

    /// Typed storage of the input family `id`, if it exists.
    pub fn input_storage<Params, Value>(
        &self,
        id: InputId,
    ) -> Option<Arc<InputStorage<Params, Value>>>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        let slot = self.inputs.get(&id)?.clone();

        Some(
            slot.as_any_arc()
                .downcast()
                .expect("input family should be reused with one signature only"),
        )
    }
}

#[cfg(test)]
mod test {
    mod store {
        use super::super::Store;
        use crate::key::InputId;
        use crate::time::Revision;

        #[test]
        fn test_input_family_is_created_once() {
            let mut store = Store::new();
            let id = InputId::derive::<(), u32>("counter");

            let first = store.input_storage_or_insert::<(), u32>(id);
            first.insert((), 3, Revision::initial());

            let second = store.input_storage_or_insert::<(), u32>(id);

            assert_eq!(second.get(&()), Some(3));
            assert_eq!(store.inputs.len(), 1);
        }

        #[test]
        fn test_missing_family_is_not_created_by_lookup() {
            let store = Store::new();
            let id = InputId::derive::<(), u32>("counter");

            assert!(store.input_storage::<(), u32>(id).is_none());
            assert!(store.inputs.is_empty());
        }
    }
}
