//! Input node storage and handles.
//!
//! Inputs are the externally set values at the mutable frontier of the
//! dependency graph. A family is either a single *scalar* slot (keyed by
//! the empty tuple) or a *map* keyed by arbitrary parameter values; both
//! shapes share one storage representation.
//!
//! # Design: explicit writes only
//!
//! A slot or map key holds a value only after it was explicitly written.
//! Reading anything else is an error ([`Error::UninitializedInput`] for
//! scalars, [`Error::MissingInputKey`] for map keys) rather than a default
//! value: a default would silently absorb the difference between "never
//! set" and "set to the default", and that difference is exactly what
//! change tracking is about.
//!
//! # Handles
//!
//! [`ScalarInput`] and [`MapInput`] are cheap copyable identities; the
//! values themselves live in per-family tables inside the runtime. Handle
//! identity derives from the declared name and the type signature, so
//! independently constructed handles with the same declaration address the
//! same family. Getters take the query context last, the way query calls
//! do; setters live on [`Runtime`](crate::Runtime) because mutation
//! requires quiescence, not a context.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, QueryResult};
use crate::key::{DynParams, InputId, NodeKey};
use crate::node::InputNode;
use crate::runtime::QueryContext;
use crate::time::Revision;
use crate::Stashable;

/// Value marked with the revision since when it is current.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct TimedValue<Value> {
    pub value: Value,
    pub changed_at: Revision,
}

/// Storage of one input family.
pub(crate) struct InputStorage<Params, Value> {
    id: InputId,
    entries: Mutex<HashMap<Params, TimedValue<Value>>>,
}

impl<Params, Value> InputStorage<Params, Value>
where
    Params: Stashable + Hash,
    Value: Stashable,
{
    pub fn new(id: InputId) -> Self {
        InputStorage {
            id,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Currently stored value under `params`.
    pub fn get(&self, params: &Params) -> Option<Value> {
        self.entries
            .lock()
            .get(params)
            .map(|timed| timed.value.clone())
    }

    /// Whether the value stored under `params` is already equal to `value`.
    ///
    /// Equal writes must not advance the clock, so the write path asks this
    /// before touching anything.
    pub fn is_unchanged(&self, params: &Params, value: &Value) -> bool {
        self.entries
            .lock()
            .get(params)
            .map_or(false, |timed| timed.value == *value)
    }

    /// Store `value` under `params`, stamped with `changed_at`.
    pub fn insert(&self, params: Params, value: Value, changed_at: Revision) {
        self.entries
            .lock()
            .insert(params, TimedValue { value, changed_at });
    }

    /// Whether an entry exists under `params`.
    pub fn contains(&self, params: &Params) -> bool {
        self.entries.lock().contains_key(params)
    }

    /// Drop the entry under `params`.
    pub fn remove(&self, params: &Params) {
        self.entries.lock().remove(params);
    }

    /// Drop every entry of the family.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<Params, Value> InputNode for InputStorage<Params, Value>
where
    Params: Stashable + Hash,
    Value: Stashable,
{
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn changed_at(&self, params: &DynParams) -> Option<Revision> {
        let params: &Params = params
            .downcast()
            .expect("input family should be addressed with its own parameter type");

        self.entries.lock().get(params).map(|timed| timed.changed_at)
    }
}

impl<Params, Value> Debug for InputStorage<Params, Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(InputStorage))
            .field("id", &self.id)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

/// Handle to a single-slot input.
///
/// Obtain one from [`Runtime::register_scalar`](crate::Runtime::register_scalar)
/// or construct it directly with [`ScalarInput::named`]; both address the
/// same slot for the same declaration.
pub struct ScalarInput<Value> {
    id: InputId,
    marker: PhantomData<fn() -> Value>,
}

impl<Value> ScalarInput<Value>
where
    Value: Stashable,
{
    /// Construct the handle for the scalar input declared under `name`.
    ///
    /// Identity derives from the name and the value type, so independently
    /// constructed handles with the same declaration address the same slot.
    pub fn named(name: &'static str) -> Self {
        ScalarInput {
            id: InputId::derive::<(), Value>(name),
            marker: PhantomData,
        }
    }

    /// Acquire the currently stored value.
    ///
    /// Fails with [`Error::UninitializedInput`] before the first write.
    pub fn get(&self, cx: &QueryContext<'_>) -> QueryResult<Value> {
        let key = NodeKey::input(self.id, DynParams::new(()));
        cx.record(&key);

        cx.runtime()
            .read_input::<(), Value>(self.id, &())
            .ok_or(Error::UninitializedInput(key))
    }

    pub(crate) fn id(&self) -> InputId {
        self.id
    }
}

impl<Value> Clone for ScalarInput<Value> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Value> Copy for ScalarInput<Value> {}

impl<Value> Debug for ScalarInput<Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(stringify!(ScalarInput)).field(&self.id).finish()
    }
}

/// Handle to a keyed input family.
///
/// Obtain one from [`Runtime::register_map`](crate::Runtime::register_map)
/// or construct it directly with [`MapInput::named`]; both address the same
/// family for the same declaration.
pub struct MapInput<Key, Value> {
    id: InputId,
    marker: PhantomData<fn(Key) -> Value>,
}

impl<Key, Value> MapInput<Key, Value>
where
    Key: Stashable + Hash,
    Value: Stashable,
{
    /// Construct the handle for the map input declared under `name`.
    ///
    /// Identity derives from the name and the key/value types, so
    /// independently constructed handles with the same declaration address
    /// the same family.
    pub fn named(name: &'static str) -> Self {
        MapInput {
            id: InputId::derive::<Key, Value>(name),
            marker: PhantomData,
        }
    }

    /// Acquire the value stored under `key`.
    ///
    /// Fails with [`Error::MissingInputKey`] when the key was never written
    /// or has been removed.
    pub fn get(&self, key: &Key, cx: &QueryContext<'_>) -> QueryResult<Value> {
        let node_key = NodeKey::input(self.id, DynParams::new(key.clone()));
        cx.record(&node_key);

        cx.runtime()
            .read_input::<Key, Value>(self.id, key)
            .ok_or(Error::MissingInputKey(node_key))
    }

    pub(crate) fn id(&self) -> InputId {
        self.id
    }
}

impl<Key, Value> Clone for MapInput<Key, Value> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Key, Value> Copy for MapInput<Key, Value> {}

impl<Key, Value> Debug for MapInput<Key, Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(stringify!(MapInput)).field(&self.id).finish()
    }
}

#[cfg(test)]
mod test {
    use crate::error::Error;
    use crate::runtime::Runtime;
    use crate::time::Revision;

    // Reads before the first write must fail, not invent values.
    #[test]
    fn test_unset_reads_fail() {
        let rt = Runtime::new();

        let count = rt.register_scalar::<u32>("count");
        let trees = rt.register_map::<u32, String>("trees");

        assert!(matches!(
            rt.read_scalar(&count),
            Err(Error::UninitializedInput(_))
        ));
        assert!(matches!(
            rt.read_map(&trees, &3),
            Err(Error::MissingInputKey(_))
        ));
    }

    #[test]
    fn test_set_then_get() {
        let rt = Runtime::new();
        let trees = rt.register_map::<u32, String>("trees");

        rt.set_map(&trees, 3, "a stump".to_string());
        rt.set_map(&trees, 178, "a christmas tree".to_string());

        assert_eq!(rt.read_map(&trees, &3).unwrap(), "a stump");
        assert_eq!(rt.read_map(&trees, &178).unwrap(), "a christmas tree");
        assert!(rt.read_map(&trees, &5).is_err());
    }

    // Writes of an equal value must leave the clock alone.
    #[test]
    fn test_equal_write_elision() {
        let rt = Runtime::new();
        let count = rt.register_scalar::<u32>("count");

        rt.set_scalar(&count, 5);
        assert_eq!(rt.current_revision(), Revision::new(1));

        rt.set_scalar(&count, 5);
        assert_eq!(rt.current_revision(), Revision::new(1));

        rt.set_scalar(&count, 6);
        assert_eq!(rt.current_revision(), Revision::new(2));
    }

    #[test]
    fn test_remove() {
        let rt = Runtime::new();
        let trees = rt.register_map::<u32, String>("trees");

        rt.set_map(&trees, 3, "a stump".to_string());
        assert_eq!(rt.current_revision(), Revision::new(1));

        rt.remove_map(&trees, &3);
        assert_eq!(rt.current_revision(), Revision::new(2));
        assert!(matches!(
            rt.read_map(&trees, &3),
            Err(Error::MissingInputKey(_))
        ));

        // Removal has no elision: the clock advances even when the key is
        // already gone.
        rt.remove_map(&trees, &3);
        assert_eq!(rt.current_revision(), Revision::new(3));
    }

    #[test]
    fn test_clear() {
        let rt = Runtime::new();
        let trees = rt.register_map::<u32, String>("trees");

        // Clearing advances the clock even on an empty family.
        rt.clear_map(&trees);
        assert_eq!(rt.current_revision(), Revision::new(1));

        rt.set_map(&trees, 1, "an oak".to_string());
        rt.set_map(&trees, 2, "a birch".to_string());
        assert_eq!(rt.current_revision(), Revision::new(3));

        rt.clear_map(&trees);
        assert_eq!(rt.current_revision(), Revision::new(4));
        assert!(rt.read_map(&trees, &1).is_err());
        assert!(rt.read_map(&trees, &2).is_err());
    }

    // Removal requires quiescence even for a key that was never written.
    #[test]
    #[should_panic(expected = "input mutated while a query computation is active")]
    fn test_remove_inside_query_asserts() {
        use std::sync::Arc;

        let rt = Arc::new(Runtime::new());
        let trees = rt.register_map::<u32, String>("trees");

        let inner_rt = rt.clone();
        let bad = rt.register_query("bad", move |_cx, _: &()| {
            inner_rt.remove_map(&trees, &3);
            Ok(())
        });

        let _ = rt.call(&bad, ());
    }

    #[test]
    fn test_seeded_registration() {
        let rt = Runtime::new();

        let count = rt.register_scalar_with("count", 10_u32);
        let trees = rt.register_map_with("trees", [(1_u32, "an oak".to_string())]);

        // Seeding does not advance the clock.
        assert_eq!(rt.current_revision(), Revision::initial());
        assert_eq!(rt.read_scalar(&count).unwrap(), 10);
        assert_eq!(rt.read_map(&trees, &1).unwrap(), "an oak");

        // Re-registration never clobbers what was written since.
        rt.set_scalar(&count, 20);
        let count = rt.register_scalar_with("count", 10_u32);
        assert_eq!(rt.read_scalar(&count).unwrap(), 20);
    }

    #[test]
    fn test_named_handles_alias_registered_family() {
        use super::ScalarInput;

        let rt = Runtime::new();
        let registered = rt.register_scalar::<u32>("count");

        rt.set_scalar(&registered, 7);

        let named = ScalarInput::<u32>::named("count");
        assert_eq!(rt.read_scalar(&named).unwrap(), 7);
    }
}
