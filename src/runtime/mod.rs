//! Runtime and query context.
//!
//! # Storage
//!
//! The runtime owns all cached state behind one store lock: the revision
//! clock and a registry of *node families*, one per registered query or
//! input, created lazily for inputs that are written before being
//! registered. Families are stored erased; the typed view is restored at
//! call sites where the handle supplies the signature.
//!
//! # Synchronization
//!
//! The store lock is only ever taken for short structural operations:
//! registry lookups, clock reads, the active-count bumps around a lookup,
//! and input writes. User query functions always run with no lock held, so
//! parallel threads can execute queries freely.
//!
//! Consistency between those threads hinges on a single rule: the clock
//! cannot advance while any query computation is active. Every lookup
//! raises the active count for its duration, and input writes assert the
//! count is zero: mutating an input from inside a query function is a
//! programmer error and fails loudly rather than silently corrupting
//! dependency reasoning. A consequence worth knowing: two concurrent
//! top-level calls may both find a bound query cold and both calculate it.
//! The engine accepts the duplicate work and keeps whichever result is
//! installed last; for pure functions both results are equal.
//!
//! # Contexts
//!
//! Every top-level call owns a [`QueryContext`], which carries the
//! dependency trace for the call tree it spawns. Query functions receive
//! the context and pass it along to every read they make; that is how the
//! engine learns the edges of the dependency graph. Contexts are not
//! shared across threads; each top-level call builds its own.

pub(crate) mod clock;

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::QueryResult;
use crate::key::{DynParams, InputId, NodeId, NodeKey, QueryId};
use crate::node::input::{MapInput, ScalarInput};
use crate::node::query::{QueryHandle, QueryStorage, Thunk};
use crate::node::Store;
use crate::time::Revision;
use crate::trace::TraceStack;
use crate::Stashable;

use clock::ActiveQuery;

/// Central point of access to queries and inputs.
///
/// The runtime holds every cached value and the revision clock. It is
/// freely shareable across threads; wrap it in an [`Arc`] when query
/// functions themselves need a handle back to it.
pub struct Runtime {
    store: Mutex<Store>,
}

impl Runtime {
    /// Create a new runtime.
    pub fn new() -> Runtime {
        Runtime {
            store: Mutex::new(Store::new()),
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register the query declared under `name`.
    ///
    /// Registration is idempotent: registering the same declaration again
    /// replaces the calculation and keeps every cached value. Returns the
    /// handle used to call the query; [`QueryHandle::named`] constructs an
    /// equal handle without registering.
    pub fn register_query<Params, Value, F>(
        &self,
        name: &'static str,
        calculation: F,
    ) -> QueryHandle<Params, Value>
    where
        Params: Stashable + Hash,
        Value: Stashable,
        F: Fn(&QueryContext<'_>, &Params) -> QueryResult<Value> + Send + Sync + 'static,
    {
        let handle = QueryHandle::named(name);
        let thunk: Thunk<Params, Value> = Arc::new(calculation);

        let mut store = self.store.lock();
        match store.queries.get(&handle.id()) {
            Some(slot) => {
                let storage = slot
                    .clone()
                    .as_any_arc()
                    .downcast::<QueryStorage<Params, Value>>()
                    .expect("query family should be reused with one signature only");

                storage.replace_thunk(thunk);
            }
            None => {
                store
                    .queries
                    .insert(handle.id(), Arc::new(QueryStorage::new(handle.id(), thunk)));
            }
        }

        handle
    }

    /// Register the scalar input declared under `name`.
    pub fn register_scalar<Value>(&self, name: &'static str) -> ScalarInput<Value>
    where
        Value: Stashable,
    {
        let handle = ScalarInput::named(name);
        self.store
            .lock()
            .input_storage_or_insert::<(), Value>(handle.id());

        handle
    }

    /// Register the scalar input declared under `name`, seeding `value`
    /// unless the slot was already written.
    ///
    /// Seeding stores the value at the current revision without advancing
    /// the clock.
    pub fn register_scalar_with<Value>(&self, name: &'static str, value: Value) -> ScalarInput<Value>
    where
        Value: Stashable,
    {
        let handle = ScalarInput::named(name);

        let mut store = self.store.lock();
        let storage = store.input_storage_or_insert::<(), Value>(handle.id());
        if !storage.contains(&()) {
            storage.insert((), value, store.clock.current());
        }

        handle
    }

    /// Register the map input declared under `name`.
    pub fn register_map<Key, Value>(&self, name: &'static str) -> MapInput<Key, Value>
    where
        Key: Stashable + Hash,
        Value: Stashable,
    {
        let handle = MapInput::named(name);
        self.store
            .lock()
            .input_storage_or_insert::<Key, Value>(handle.id());

        handle
    }

    /// Register the map input declared under `name`, seeding `contents`
    /// for keys that were not already written.
    ///
    /// Seeding stores values at the current revision without advancing the
    /// clock.
    pub fn register_map_with<Key, Value, I>(
        &self,
        name: &'static str,
        contents: I,
    ) -> MapInput<Key, Value>
    where
        Key: Stashable + Hash,
        Value: Stashable,
        I: IntoIterator<Item = (Key, Value)>,
    {
        let handle = MapInput::named(name);

        let mut store = self.store.lock();
        let storage = store.input_storage_or_insert::<Key, Value>(handle.id());
        let revision = store.clock.current();
        for (key, value) in contents {
            if !storage.contains(&key) {
                storage.insert(key, value, revision);
            }
        }

        handle
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Store `value` in a scalar input.
    ///
    /// Writing a value equal to the stored one is a no-op that leaves the
    /// revision untouched; an actual change advances the clock.
    ///
    /// # Panics
    ///
    /// Panics when the write would change the value while any query
    /// computation is active, including when called from inside a query
    /// function.
    pub fn set_scalar<Value>(&self, input: &ScalarInput<Value>, value: Value)
    where
        Value: Stashable,
    {
        let mut store = self.store.lock();
        let storage = store.input_storage_or_insert::<(), Value>(input.id());

        if storage.is_unchanged(&(), &value) {
            return;
        }

        let revision = store.clock.advance_for_write();
        storage.insert((), value, revision);

        info!(input = input.id().name(), revision = ?revision, "set scalar input");
    }

    /// Store `value` under `key` in a map input.
    ///
    /// Writing a value equal to the stored one is a no-op that leaves the
    /// revision untouched; an actual change advances the clock.
    ///
    /// # Panics
    ///
    /// Panics when the write would change the value while any query
    /// computation is active, including when called from inside a query
    /// function.
    pub fn set_map<Key, Value>(&self, input: &MapInput<Key, Value>, key: Key, value: Value)
    where
        Key: Stashable + Hash,
        Value: Stashable,
    {
        let mut store = self.store.lock();
        let storage = store.input_storage_or_insert::<Key, Value>(input.id());

        if storage.is_unchanged(&key, &value) {
            return;
        }

        let revision = store.clock.advance_for_write();
        storage.insert(key, value, revision);

        info!(input = input.id().name(), revision = ?revision, "set map input");
    }

    /// Remove the entry under `key` from a map input.
    ///
    /// Later reads of the key fail with
    /// [`Error::MissingInputKey`](crate::Error::MissingInputKey), and any
    /// cached query that read the entry invalidates on its next call.
    /// Unlike the set path, removal has no equality-style elision: the
    /// clock advances on every call, whether or not the key was present.
    ///
    /// # Panics
    ///
    /// Panics when called while any query computation is active.
    pub fn remove_map<Key, Value>(&self, input: &MapInput<Key, Value>, key: &Key)
    where
        Key: Stashable + Hash,
        Value: Stashable,
    {
        let mut store = self.store.lock();
        store.clock.advance_for_write();

        if let Some(storage) = store.input_storage::<Key, Value>(input.id()) {
            storage.remove(key);
        }

        info!(input = input.id().name(), "remove map entry");
    }

    /// Remove every entry of a map input.
    ///
    /// Like [`remove_map`](Runtime::remove_map), the clock advances once
    /// on every call, even when the family was already empty.
    ///
    /// # Panics
    ///
    /// Panics when called while any query computation is active.
    pub fn clear_map<Key, Value>(&self, input: &MapInput<Key, Value>)
    where
        Key: Stashable + Hash,
        Value: Stashable,
    {
        let mut store = self.store.lock();
        store.clock.advance_for_write();

        if let Some(storage) = store.input_storage::<Key, Value>(input.id()) {
            storage.clear();
        }

        info!(input = input.id().name(), "clear map input");
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Run `f` with a fresh [`QueryContext`].
    ///
    /// Handy for grouping several reads; note that consistency is
    /// guaranteed per executed query, not per context: another thread may
    /// write inputs between two top-level calls made with one context.
    pub fn query<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&QueryContext<'_>) -> T,
    {
        let cx = QueryContext::new(self);
        f(&cx)
    }

    /// Execute a query at top level.
    pub fn call<Params, Value>(
        &self,
        query: &QueryHandle<Params, Value>,
        params: Params,
    ) -> QueryResult<Value>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        self.query(|cx| query.call(params, cx))
    }

    /// Read a scalar input at top level.
    pub fn read_scalar<Value>(&self, input: &ScalarInput<Value>) -> QueryResult<Value>
    where
        Value: Stashable,
    {
        self.query(|cx| input.get(cx))
    }

    /// Read a map input at top level.
    pub fn read_map<Key, Value>(&self, input: &MapInput<Key, Value>, key: &Key) -> QueryResult<Value>
    where
        Key: Stashable + Hash,
        Value: Stashable,
    {
        self.query(|cx| input.get(key, cx))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Revision the runtime is currently at.
    pub fn current_revision(&self) -> Revision {
        self.store.lock().clock.current()
    }

    /// Keys cached for `query`, in deterministic order.
    pub fn cached_keys<Params, Value>(&self, query: &QueryHandle<Params, Value>) -> Vec<NodeKey>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        let Some(slot) = self.store.lock().queries.get(&query.id()).cloned() else {
            return Vec::new();
        };

        let mut keys: Vec<NodeKey> = slot
            .cached_params()
            .into_iter()
            .map(|params| NodeKey::query(query.id(), params))
            .collect();
        keys.sort_by_key(|key| key.sort_token());

        keys
    }

    /// Direct upstream edges recorded for the entry cached under `params`,
    /// in first-read order.
    pub fn upstream_of<Params, Value>(
        &self,
        query: &QueryHandle<Params, Value>,
        params: &Params,
    ) -> Option<Vec<NodeKey>>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        let slot = self.store.lock().queries.get(&query.id()).cloned()?;

        slot.upstream_of(&DynParams::new(params.clone()))
    }

    /// Revisions stamped on the entry cached under `params`: when the value
    /// last changed and when it was last confirmed current.
    pub fn memo_revisions<Params, Value>(
        &self,
        query: &QueryHandle<Params, Value>,
        params: &Params,
    ) -> Option<(Revision, Revision)>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        let slot = self.store.lock().queries.get(&query.id()).cloned()?;
        let storage = slot
            .as_any_arc()
            .downcast::<QueryStorage<Params, Value>>()
            .ok()?;

        let memo = storage.memo(params)?;
        let verified_at = memo.state.lock().verified_at;

        Some((memo.changed_at, verified_at))
    }

    // ------------------------------------------------------------------
    // Internal plumbing
    // ------------------------------------------------------------------

    /// Raise the active-computation count and pin the current revision.
    pub(crate) fn begin_query(&self) -> ActiveQuery<'_> {
        let revision = self.store.lock().clock.begin_query();

        ActiveQuery::new(self, revision)
    }

    pub(crate) fn end_query(&self) {
        self.store.lock().clock.end_query();
    }

    /// Read an input value, recording nothing.
    pub(crate) fn read_input<Params, Value>(&self, id: InputId, params: &Params) -> Option<Value>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        let storage = self.store.lock().input_storage::<Params, Value>(id)?;

        storage.get(params)
    }

    /// Typed storage of the query family `id`.
    ///
    /// # Panics
    ///
    /// Panics when the query was never registered: identities are declared
    /// by client code at startup, so a missing binding is a programmer
    /// error, not a recoverable condition.
    pub(crate) fn query_storage<Params, Value>(&self, id: QueryId) -> Arc<QueryStorage<Params, Value>>
    where
        Params: Stashable + Hash,
        Value: Stashable,
    {
        let slot = self
            .store
            .lock()
            .queries
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("query `{}` was called before being registered", id.name()));

        slot.as_any_arc()
            .downcast()
            .expect("query family should be reused with one signature only")
    }

    /// Revision at which `key` last changed, validating or recalculating
    /// the underlying entry as needed.
    ///
    /// An input entry that was removed (or never written) reads as changed
    /// at the current revision, which invalidates anything that recorded
    /// it; the recalculation then surfaces the read failure itself.
    pub(crate) fn key_changed_at(&self, cx: &QueryContext<'_>, key: &NodeKey) -> QueryResult<Revision> {
        match key.id() {
            NodeId::Input(id) => {
                let (slot, current) = {
                    let store = self.store.lock();
                    (store.inputs.get(&id).cloned(), store.clock.current())
                };

                let changed_at = slot.and_then(|slot| slot.changed_at(key.params()));

                Ok(changed_at.unwrap_or(current))
            }
            NodeId::Query(id) => {
                let slot = self
                    .store
                    .lock()
                    .queries
                    .get(&id)
                    .cloned()
                    .expect("recorded query dependency should stay registered");

                slot.changed_at(cx, key.params())
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(Runtime)).finish_non_exhaustive()
    }
}

/// Execution context handed to query functions.
///
/// The context carries the dependency trace of one top-level call. Query
/// functions receive it as their first parameter and pass it along to
/// every input read and query call they make; reads that bypass the
/// context go unrecorded and will not be watched for changes.
pub struct QueryContext<'rt> {
    rt: &'rt Runtime,
    trace: Mutex<TraceStack>,
}

impl<'rt> QueryContext<'rt> {
    pub(crate) fn new(rt: &'rt Runtime) -> Self {
        QueryContext {
            rt,
            trace: Mutex::new(TraceStack::default()),
        }
    }

    pub(crate) fn runtime(&self) -> &'rt Runtime {
        self.rt
    }

    /// Record a direct dependency edge in the innermost executing query.
    pub(crate) fn record(&self, key: &NodeKey) {
        self.trace.lock().record(key);
    }

    /// Open a computation frame for `key`.
    pub(crate) fn enter(&self, key: NodeKey) -> QueryResult<FrameGuard<'_, 'rt>> {
        self.trace.lock().push(key)?;

        Ok(FrameGuard {
            cx: self,
            finished: false,
        })
    }

    /// Snapshot of the keys currently executing, outermost first.
    pub(crate) fn live_stack(&self) -> Vec<NodeKey> {
        self.trace.lock().live().to_vec()
    }
}

impl Debug for QueryContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(QueryContext)).finish_non_exhaustive()
    }
}

/// Scoped release of a computation frame.
///
/// Dropping the guard pops the frame, so failure paths unwind cleanly;
/// `finish` pops it and hands back the recorded edges.
pub(crate) struct FrameGuard<'cx, 'rt> {
    cx: &'cx QueryContext<'rt>,
    finished: bool,
}

impl FrameGuard<'_, '_> {
    /// Close the frame and produce the recorded edges.
    pub(crate) fn finish(mut self) -> Vec<NodeKey> {
        self.finished = true;

        self.cx.trace.lock().pop()
    }
}

impl Drop for FrameGuard<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.cx.trace.lock().pop();
        }
    }
}
