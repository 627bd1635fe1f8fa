//! Failures surfaced by query execution and input reads.

use std::sync::Arc;

use thiserror::Error;

use crate::key::NodeKey;

/// A shortcut for results produced by queries and input reads.
pub type QueryResult<T> = Result<T, Error>;

/// Failures surfaced by query execution and input reads.
///
/// The engine performs no local recovery: on any failure path the
/// dependency trace and the active-computation count are restored, and the
/// error reaches the originating top-level call unchanged apart from the
/// live-call stack annotation on [`Error::UserFunction`]. No cached entry
/// is installed for a failed calculation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Scalar input was read before its first write.
    #[error("input `{0}` was read before it was set")]
    UninitializedInput(NodeKey),

    /// Map input was read under a key that is not present.
    #[error("input entry {0} is not present")]
    MissingInputKey(NodeKey),

    /// A query re-entered a key that is already executing.
    ///
    /// Only produced with the `cycle-detection` feature enabled.
    #[error("dependency cycle detected while computing {key}")]
    Cycle {
        /// The key whose re-entry closed the cycle.
        key: NodeKey,
        /// Call stack that was live when the cycle was detected,
        /// outermost first.
        stack: Vec<NodeKey>,
    },

    /// A user query function failed.
    #[error("query function failed: {source}")]
    UserFunction {
        /// Call stack that was live at the point of failure,
        /// outermost first.
        stack: Vec<NodeKey>,
        /// The failure raised by the query function.
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Wrap an arbitrary failure raised inside a query function.
    ///
    /// The engine annotates the failure with the live-call stack at the
    /// point it was raised; propagation through outer queries leaves it
    /// untouched.
    pub fn failure<E>(source: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::UserFunction {
            stack: Vec::new(),
            source: Arc::from(source.into()),
        }
    }

    /// Call stack captured with the error, outermost first.
    ///
    /// Empty for errors that carry no stack.
    pub fn trace(&self) -> &[NodeKey] {
        match self {
            Error::Cycle { stack, .. } | Error::UserFunction { stack, .. } => stack,
            _ => &[],
        }
    }

    /// Attach `stack` to a bare user failure.
    ///
    /// Only the first annotation sticks, so the stack always describes the
    /// deepest frame where the failure was raised.
    pub(crate) fn annotate(self, stack: Vec<NodeKey>) -> Error {
        match self {
            Error::UserFunction { stack: old, source } if old.is_empty() => {
                Error::UserFunction { stack, source }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Error;
    use crate::key::{DynParams, NodeKey, QueryId};

    fn make_key(name: &'static str) -> NodeKey {
        NodeKey::query(QueryId::derive::<(), u32>(name), DynParams::new(()))
    }

    #[test]
    fn test_failure_starts_bare() {
        let error = Error::failure("file is gone");

        assert!(error.trace().is_empty());
        assert!(error.to_string().contains("file is gone"));
    }

    #[test]
    fn test_annotate_sticks_once() {
        let inner = vec![make_key("a"), make_key("b")];
        let outer = vec![make_key("a")];

        let error = Error::failure("boom")
            .annotate(inner.clone())
            .annotate(outer);

        assert_eq!(error.trace(), inner.as_slice());
    }

    #[test]
    fn test_annotate_leaves_other_kinds_alone() {
        let key = make_key("orphan");
        let error = Error::MissingInputKey(key.clone()).annotate(vec![make_key("a")]);

        assert!(matches!(error, Error::MissingInputKey(k) if k == key));
    }
}
