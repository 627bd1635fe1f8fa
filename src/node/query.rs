//! Query node storage and the memoized lookup.
//!
//! Queries are pure functions which can cache their value and recalculate
//! only when other queries or inputs they read change. A query is
//! registered once per runtime; every combination of parameter values gets
//! its own cached entry (*bound query*).
//!
//! # Update routine
//!
//! When a bound query is requested and a cached entry exists, the entry is
//! brought up to date in three steps:
//!
//! 1.  Check if the entry was already confirmed at the current revision.
//!
//!     A fresh entry is authoritative: the clock cannot advance while any
//!     computation is active, so nothing it depends on can have moved.
//!
//! 2.  Check the direct upstream edges recorded during the last
//!     calculation, in first-read order.
//!
//!     Each edge is recursively brought up to date and reports the
//!     revision its value last changed at. If none changed past the
//!     revision this entry was last confirmed at, the entry is still
//!     valid and only its confirmation stamp moves forward.
//!
//! 3.  Recalculate and compare against the cached value.
//!
//!     An equal result keeps the cached value and only refreshes the
//!     bookkeeping, which cuts invalidation off: downstream entries keep
//!     validating against the old change stamp.
//!
//! Steps 1 and 2 are cheap; step 3 runs the user function with no lock
//! held, so parallel callers can compute freely. Two threads racing on the
//! same bound query may both run step 3; the installation is
//! last-writer-wins, which is harmless for pure functions.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::QueryResult;
use crate::key::{DynParams, NodeKey, QueryId};
use crate::node::QueryNode;
use crate::runtime::QueryContext;
use crate::time::Revision;
use crate::Stashable;

/// Calculation backing a query family: the registered user function.
pub(crate) type Thunk<Params, Value> =
    Arc<dyn Fn(&QueryContext<'_>, &Params) -> QueryResult<Value> + Send + Sync>;

/// One cached value of a bound query.
///
/// `value` and `changed_at` never change after installation; a
/// recalculation that produces a different value installs a whole new memo
/// instead. Everything mutable lives behind `state` and is touched only
/// under its lock.
pub(crate) struct Memo<Value> {
    pub value: Value,
    pub changed_at: Revision,
    pub state: Mutex<MemoState>,
}

/// Mutable bookkeeping of a memo.
#[derive(Debug)]
pub(crate) struct MemoState {
    /// Latest revision at which the cached value was confirmed current.
    pub verified_at: Revision,

    /// Direct upstream edges observed during the most recent calculation,
    /// in first-read order.
    pub upstream: Vec<NodeKey>,
}

impl<Value> Memo<Value> {
    fn new(value: Value, revision: Revision, upstream: Vec<NodeKey>) -> Self {
        Memo {
            value,
            changed_at: revision,
            state: Mutex::new(MemoState {
                verified_at: revision,
                upstream,
            }),
        }
    }
}

impl<Value> Debug for Memo<Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct(stringify!(Memo))
            .field("changed_at", &self.changed_at)
            .field("verified_at", &state.verified_at)
            .field("upstream", &state.upstream.len())
            .finish_non_exhaustive()
    }
}

/// Outcome of one memoized lookup.
pub(crate) struct Fetched<Value> {
    pub value: Value,
    pub changed_at: Revision,
}

/// Storage of one query family: the registered calculation plus every
/// cached bound value.
pub(crate) struct QueryStorage<Params, Value> {
    id: QueryId,
    thunk: Mutex<Thunk<Params, Value>>,
    memos: Mutex<HashMap<Params, Arc<Memo<Value>>>>,
}

impl<Params, Value> QueryStorage<Params, Value>
where
    Params: Stashable + Hash,
    Value: Stashable,
{
    pub fn new(id: QueryId, thunk: Thunk<Params, Value>) -> Self {
        QueryStorage {
            id,
            thunk: Mutex::new(thunk),
            memos: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the registered calculation.
    pub fn replace_thunk(&self, thunk: Thunk<Params, Value>) {
        *self.thunk.lock() = thunk;
    }

    /// Memo cached for `params`, if any.
    pub fn memo(&self, params: &Params) -> Option<Arc<Memo<Value>>> {
        self.memos.lock().get(params).cloned()
    }

    /// Memoized lookup: serve the cached value while it is still current,
    /// otherwise revalidate or recalculate.
    pub fn fetch(
        &self,
        cx: &QueryContext<'_>,
        key: &NodeKey,
        params: &Params,
    ) -> QueryResult<Fetched<Value>> {
        let active = cx.runtime().begin_query();
        let current = active.revision();

        let existing = self.memo(params);

        if let Some(memo) = &existing {
            let (verified_at, upstream) = {
                let state = memo.state.lock();
                (state.verified_at, state.upstream.clone())
            };

            if verified_at == current {
                debug!(node = %key, "serve fresh value");

                return Ok(Fetched {
                    value: memo.value.clone(),
                    changed_at: memo.changed_at,
                });
            }

            if self.still_valid(cx, &upstream, verified_at)? {
                memo.state.lock().verified_at = current;

                debug!(node = %key, "revalidate cached value");

                return Ok(Fetched {
                    value: memo.value.clone(),
                    changed_at: memo.changed_at,
                });
            }
        }

        let frame = cx.enter(key.clone())?;
        let thunk = self.thunk.lock().clone();

        let value = match thunk(cx, params) {
            Ok(value) => value,
            Err(error) => {
                let error = error.annotate(cx.live_stack());
                drop(frame);

                debug!(node = %key, "calculation failed");

                return Err(error);
            }
        };

        let upstream = frame.finish();

        if let Some(memo) = existing {
            if memo.value == value {
                // Equal recalculation: the cached value stays put and only
                // the bookkeeping is refreshed.
                let mut state = memo.state.lock();
                state.verified_at = current;
                state.upstream = upstream;
                drop(state);

                debug!(node = %key, "recalculated to equal value");

                return Ok(Fetched {
                    value: memo.value.clone(),
                    changed_at: memo.changed_at,
                });
            }
        }

        info!(node = %key, revision = ?current, "persist new value");

        let memo = Arc::new(Memo::new(value.clone(), current, upstream));
        self.memos.lock().insert(params.clone(), memo);

        Ok(Fetched {
            value,
            changed_at: current,
        })
    }

    /// Walk recorded upstream edges in order; the cached value is still
    /// valid when none changed past `verified_at`.
    fn still_valid(
        &self,
        cx: &QueryContext<'_>,
        upstream: &[NodeKey],
        verified_at: Revision,
    ) -> QueryResult<bool> {
        for edge in upstream {
            if cx.runtime().key_changed_at(cx, edge)? > verified_at {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl<Params, Value> QueryNode for QueryStorage<Params, Value>
where
    Params: Stashable + Hash,
    Value: Stashable,
{
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn changed_at(&self, cx: &QueryContext<'_>, params: &DynParams) -> QueryResult<Revision> {
        let typed: &Params = params
            .downcast()
            .expect("query family should be addressed with its own parameter type");
        let key = NodeKey::query(self.id, params.clone());

        self.fetch(cx, &key, typed).map(|fetched| fetched.changed_at)
    }

    fn cached_params(&self) -> Vec<DynParams> {
        self.memos
            .lock()
            .keys()
            .map(|params| DynParams::new(params.clone()))
            .collect()
    }

    fn upstream_of(&self, params: &DynParams) -> Option<Vec<NodeKey>> {
        let typed: &Params = params.downcast()?;
        let memo = self.memo(typed)?;
        let upstream = memo.state.lock().upstream.clone();

        Some(upstream)
    }
}

impl<Params, Value> Debug for QueryStorage<Params, Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(QueryStorage))
            .field("id", &self.id)
            .field("memos", &self.memos.lock().len())
            .finish_non_exhaustive()
    }
}

/// Handle to a registered query.
///
/// Obtain one from [`Runtime::register_query`](crate::Runtime::register_query)
/// or construct it directly with [`QueryHandle::named`]. The latter makes
/// self-recursive queries straightforward: construct the handle first, then
/// move it into the calculation you register under the same name.
pub struct QueryHandle<Params, Value> {
    id: QueryId,
    marker: PhantomData<fn(Params) -> Value>,
}

impl<Params, Value> QueryHandle<Params, Value>
where
    Params: Stashable + Hash,
    Value: Stashable,
{
    /// Construct the handle for the query declared under `name`.
    ///
    /// Identity derives from the name and the parameter/value types, so
    /// independently constructed handles with the same declaration address
    /// the same family.
    pub fn named(name: &'static str) -> Self {
        QueryHandle {
            id: QueryId::derive::<Params, Value>(name),
            marker: PhantomData,
        }
    }

    /// Execute the query for `params`, serving a cached value while it is
    /// still current.
    ///
    /// # Panics
    ///
    /// Panics when the query was never registered on this runtime.
    pub fn call(&self, params: Params, cx: &QueryContext<'_>) -> QueryResult<Value> {
        let key = NodeKey::query(self.id, DynParams::new(params.clone()));
        cx.record(&key);

        let storage = cx.runtime().query_storage::<Params, Value>(self.id);

        storage.fetch(cx, &key, &params).map(|fetched| fetched.value)
    }

    pub(crate) fn id(&self) -> QueryId {
        self.id
    }
}

impl<Params, Value> Clone for QueryHandle<Params, Value> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Params, Value> Copy for QueryHandle<Params, Value> {}

impl<Params, Value> Debug for QueryHandle<Params, Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(stringify!(QueryHandle)).field(&self.id).finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::runtime::Runtime;
    use crate::time::Revision;

    // A bound query must run at most once per revision.
    #[test]
    fn test_fresh_value_is_served_from_cache() {
        let rt = Runtime::new();
        let count = rt.register_scalar_with("count", 2_u32);

        let runs = Arc::new(AtomicUsize::new(0));
        let double = {
            let runs = runs.clone();

            rt.register_query("double", move |cx, _: &()| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(count.get(cx)? * 2)
            })
        };

        assert_eq!(rt.call(&double, ()).unwrap(), 4);
        assert_eq!(rt.call(&double, ()).unwrap(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    // Bound queries of one family cache independently.
    #[test]
    fn test_bound_queries_are_independent() {
        let rt = Runtime::new();
        let trees = rt.register_map_with(
            "trees",
            [(3_u32, "a stump".to_string()), (5, "an oak".to_string())],
        );

        let shout = rt.register_query("shout", move |cx, n: &u32| {
            Ok(trees.get(n, cx)?.to_uppercase())
        });

        assert_eq!(rt.call(&shout, 3).unwrap(), "A STUMP");
        assert_eq!(rt.call(&shout, 5).unwrap(), "AN OAK");
    }

    // An equal recalculation keeps the old change stamp.
    #[test]
    fn test_equal_recalculation_keeps_change_stamp() {
        let rt = Runtime::new();
        let count = rt.register_scalar::<u32>("count");

        let parity = rt.register_query("parity", move |cx, _: &()| Ok(count.get(cx)? % 2));

        rt.set_scalar(&count, 1);
        assert_eq!(rt.call(&parity, ()).unwrap(), 1);
        assert_eq!(
            rt.memo_revisions(&parity, &()),
            Some((Revision::new(1), Revision::new(1)))
        );

        rt.set_scalar(&count, 3);
        assert_eq!(rt.call(&parity, ()).unwrap(), 1);

        // Recalculated at revision 2, but the value did not change.
        assert_eq!(
            rt.memo_revisions(&parity, &()),
            Some((Revision::new(1), Revision::new(2)))
        );
    }

    // A failed calculation must not install anything.
    #[test]
    fn test_failure_installs_nothing() {
        use crate::error::Error;

        let rt = Runtime::new();
        let count = rt.register_scalar::<u32>("count");

        let double = rt.register_query("double", move |cx, _: &()| Ok(count.get(cx)? * 2));

        let error = rt.call(&double, ()).unwrap_err();
        assert!(matches!(error, Error::UninitializedInput(_)));
        assert_eq!(rt.memo_revisions(&double, &()), None);

        // The engine must have unwound cleanly: a later write goes through
        // and the query recovers.
        rt.set_scalar(&count, 4);
        assert_eq!(rt.call(&double, ()).unwrap(), 8);
    }

    // Re-registering a query replaces the calculation but keeps the cache.
    #[test]
    fn test_reregistration_replaces_calculation() {
        let rt = Runtime::new();
        let count = rt.register_scalar_with("count", 10_u32);

        let scaled = rt.register_query("scaled", move |cx, _: &()| Ok(count.get(cx)? * 2));
        assert_eq!(rt.call(&scaled, ()).unwrap(), 20);

        let replaced = rt.register_query("scaled", move |cx, _: &()| Ok(count.get(cx)? * 3));

        // Same identity, and the cached entry survives until something
        // actually invalidates it.
        assert_eq!(rt.call(&replaced, ()).unwrap(), 20);

        rt.set_scalar(&count, 11);
        assert_eq!(rt.call(&replaced, ()).unwrap(), 33);
    }
}
