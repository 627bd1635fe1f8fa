//! Node identities and bound call keys.
//!
//! Every query and input family is identified by a stable token derived
//! from its declared name and its parameter/value type signature, so
//! families with colliding names but different signatures stay distinct.
//! A *bound* call, that is a family plus concrete parameter values, is
//! represented by [`NodeKey`], the sole handle stored in dependency lists.
//!
//! Parameter values are type-erased behind [`DynParams`] so keys of
//! heterogeneous families can live in one list. Equality stays structural:
//! a 128-bit content fingerprint is compared first and the erased values
//! are compared for real on a fingerprint match.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use siphasher::sip128::{Hasher128, SipHasher13};

use crate::Stashable;

/// Derive the identity token for a family declared under `name`.
///
/// The token folds in the parameter and value `TypeId`s, which keeps
/// families apart even when their names collide.
fn identity_token<Params, Value>(kind: &str, name: &str) -> u64
where
    Params: 'static,
    Value: 'static,
{
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    name.hash(&mut hasher);
    TypeId::of::<Params>().hash(&mut hasher);
    TypeId::of::<Value>().hash(&mut hasher);
    hasher.finish()
}

/// Identity token of one input family.
#[derive(Copy, Clone)]
pub struct InputId {
    token: u64,
    name: &'static str,
}

impl InputId {
    pub(crate) fn derive<Params, Value>(name: &'static str) -> InputId
    where
        Params: 'static,
        Value: 'static,
    {
        InputId {
            token: identity_token::<Params, Value>("input", name),
            name,
        }
    }

    /// Name the family was declared under.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for InputId {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for InputId {}

impl Hash for InputId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl Debug for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(InputId))
            .field("name", &self.name)
            .field("token", &format_args!("{:016x}", self.token))
            .finish()
    }
}

/// Identity token of one query family.
#[derive(Copy, Clone)]
pub struct QueryId {
    token: u64,
    name: &'static str,
}

impl QueryId {
    pub(crate) fn derive<Params, Value>(name: &'static str) -> QueryId
    where
        Params: 'static,
        Value: 'static,
    {
        QueryId {
            token: identity_token::<Params, Value>("query", name),
            name,
        }
    }

    /// Name the family was declared under.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for QueryId {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for QueryId {}

impl Hash for QueryId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

impl Debug for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(QueryId))
            .field("name", &self.name)
            .field("token", &format_args!("{:016x}", self.token))
            .finish()
    }
}

/// Tag distinguishing input families from query families.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeId {
    /// An externally set value family.
    Input(InputId),
    /// A memoized query family.
    Query(QueryId),
}

impl NodeId {
    /// Name the node was declared under.
    pub fn name(&self) -> &'static str {
        match self {
            NodeId::Input(id) => id.name(),
            NodeId::Query(id) => id.name(),
        }
    }
}

/// Erased view of a parameter tuple.
pub(crate) trait ParamPack: Send + Sync + 'static {
    /// Structural equality against another erased pack.
    fn dyn_eq(&self, other: &dyn ParamPack) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T> ParamPack for T
where
    T: Stashable + Hash,
{
    fn dyn_eq(&self, other: &dyn ParamPack) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 128-bit content fingerprint of a parameter tuple.
fn fingerprint<T: Hash>(value: &T) -> u128 {
    let mut state = SipHasher13::new();
    value.hash(&mut state);
    state.finish128().as_u128()
}

/// Type-erased parameter tuple of a bound call.
///
/// Cheap to clone: the values are shared, the fingerprint is precomputed.
#[derive(Clone)]
pub struct DynParams {
    fingerprint: u128,
    pack: Arc<dyn ParamPack>,
}

impl DynParams {
    pub(crate) fn new<T>(params: T) -> DynParams
    where
        T: Stashable + Hash,
    {
        DynParams {
            fingerprint: fingerprint(&params),
            pack: Arc::new(params),
        }
    }

    /// Restore the typed view.
    pub(crate) fn downcast<T: 'static>(&self) -> Option<&T> {
        self.pack.as_any().downcast_ref()
    }

    pub(crate) fn fingerprint(&self) -> u128 {
        self.fingerprint
    }
}

impl PartialEq for DynParams {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint && self.pack.dyn_eq(other.pack.as_ref())
    }
}

impl Eq for DynParams {}

impl Hash for DynParams {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl Debug for DynParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(stringify!(DynParams))
            .field(&format_args!("{:016x}", (self.fingerprint >> 64) as u64))
            .finish()
    }
}

/// Canonical handle of one bound call: node identity plus the parameter
/// values it was bound with.
///
/// Keys are what dependency lists are made of. Equality is structural on
/// both parts; the key is hashable so it can live in dedup sets.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct NodeKey {
    id: NodeId,
    params: DynParams,
}

impl NodeKey {
    pub(crate) fn input(id: InputId, params: DynParams) -> NodeKey {
        NodeKey {
            id: NodeId::Input(id),
            params,
        }
    }

    pub(crate) fn query(id: QueryId, params: DynParams) -> NodeKey {
        NodeKey {
            id: NodeId::Query(id),
            params,
        }
    }

    /// Identity of the node family this key belongs to.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn params(&self) -> &DynParams {
        &self.params
    }

    /// Token for ordering keys deterministically in diagnostics output.
    pub(crate) fn sort_token(&self) -> (u8, u64, u128) {
        let (kind, token) = match self.id {
            NodeId::Input(id) => (0, id.token),
            NodeId::Query(id) => (1, id.token),
        };

        (kind, token, self.params.fingerprint)
    }
}

impl Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(NodeKey))
            .field("node", &self.id.name())
            .field("params", &self.params)
            .finish()
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{:08x}",
            self.id.name(),
            (self.params.fingerprint >> 96) as u32
        )
    }
}

#[cfg(test)]
mod test {
    mod identity {
        use super::super::{InputId, QueryId};

        #[test]
        fn test_same_declaration_same_token() {
            let a = QueryId::derive::<(u32,), String>("parse");
            let b = QueryId::derive::<(u32,), String>("parse");

            assert_eq!(a, b);
        }

        #[test]
        fn test_name_collision_with_different_signature() {
            let a = QueryId::derive::<(u32,), String>("parse");
            let b = QueryId::derive::<(u64,), String>("parse");
            let c = QueryId::derive::<(u32,), u32>("parse");

            assert_ne!(a, b);
            assert_ne!(a, c);
            assert_ne!(b, c);
        }

        #[test]
        fn test_input_and_query_tokens_are_independent() {
            let input = InputId::derive::<(), u32>("counter");
            let query = QueryId::derive::<(), u32>("counter");

            // Tokens fold in the kind, so the families do not shadow each
            // other even with an identical name and signature.
            assert_ne!(input.token, query.token);
        }
    }

    mod dyn_params {
        use super::super::DynParams;

        #[test]
        fn test_structural_equality() {
            let a = DynParams::new("tree".to_string());
            let b = DynParams::new("tree".to_string());
            let c = DynParams::new("stump".to_string());

            assert_eq!(a, b);
            assert_ne!(a, c);
        }

        #[test]
        fn test_different_types_never_equal() {
            let text = DynParams::new("3".to_string());
            let number = DynParams::new(3_u32);

            assert_ne!(text, number);
        }

        #[test]
        fn test_downcast() {
            let params = DynParams::new((2_u32, "left"));

            assert_eq!(params.downcast::<(u32, &str)>(), Some(&(2, "left")));
            assert_eq!(params.downcast::<u32>(), None);
        }
    }

    mod node_key {
        use super::super::{DynParams, InputId, NodeKey, QueryId};
        use std::collections::HashSet;

        fn make_query_key(name: &'static str, n: u32) -> NodeKey {
            NodeKey::query(QueryId::derive::<u32, u32>(name), DynParams::new(n))
        }

        #[test]
        fn test_set_membership() {
            let mut seen = HashSet::new();

            assert!(seen.insert(make_query_key("double", 2)));
            assert!(seen.insert(make_query_key("double", 3)));
            assert!(seen.insert(make_query_key("triple", 2)));
            assert!(!seen.insert(make_query_key("double", 2)));
        }

        #[test]
        fn test_display_names_the_node() {
            let key = NodeKey::input(
                InputId::derive::<(), u32>("counter"),
                DynParams::new(()),
            );

            assert!(key.to_string().starts_with("counter#"));
        }

        #[test]
        fn test_sort_token_is_deterministic() {
            let mut keys = vec![
                make_query_key("double", 3),
                make_query_key("double", 2),
                make_query_key("triple", 2),
            ];

            keys.sort_by_key(|key| key.sort_token());
            let once: Vec<_> = keys.iter().map(|key| key.to_string()).collect();

            keys.reverse();
            keys.sort_by_key(|key| key.sort_token());
            let twice: Vec<_> = keys.iter().map(|key| key.to_string()).collect();

            assert_eq!(once, twice);
        }
    }
}
