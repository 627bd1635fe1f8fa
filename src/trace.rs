//! Per-call dependency recording.
//!
//! Every top-level call owns a [`TraceStack`]. While a query function
//! executes, the stack holds one frame per nesting level; each frame
//! collects the direct upstream edges the executing function reads. The
//! parallel live-call stack names the keys currently executing and powers
//! cycle detection.
//!
//! An edge is recorded once per user-visible read, including reads served
//! straight from cache. Internal validation lookups do not record: a
//! validity walk re-examines a dependency's own upstream edges, and those
//! belong to the dependency, not to whatever computation happens to be
//! executing above the walk.

use std::collections::HashSet;

use crate::error::QueryResult;
use crate::key::NodeKey;

/// Ordered record of the direct upstream edges observed while one query
/// function executes.
#[derive(Debug, Default)]
pub(crate) struct UpstreamEdges {
    edges: Vec<NodeKey>,
    seen: HashSet<NodeKey>,
}

impl UpstreamEdges {
    /// Record an edge, keeping only the first occurrence.
    ///
    /// Validation later replays edges in first-read order, so repeat reads
    /// of the same key must not reorder it.
    pub fn add_edge(&mut self, key: &NodeKey) {
        if self.seen.insert(key.clone()) {
            self.edges.push(key.clone());
        }
    }

    /// Edges recorded so far, in first-read order.
    pub fn edges(&self) -> &[NodeKey] {
        &self.edges
    }

    /// Consume the frame and produce the ordered edge list.
    pub fn into_edges(self) -> Vec<NodeKey> {
        self.edges
    }
}

/// Stack of dependency frames for one top-level call.
#[derive(Debug, Default)]
pub(crate) struct TraceStack {
    frames: Vec<UpstreamEdges>,
    live: Vec<NodeKey>,
}

impl TraceStack {
    /// Record a dependency edge in the frame of the innermost executing
    /// query.
    ///
    /// Reads performed at top level have no frame to land in and are
    /// dropped.
    pub fn record(&mut self, key: &NodeKey) {
        if let Some(frame) = self.frames.last_mut() {
            frame.add_edge(key);
        }
    }

    /// Open a frame for a computation of `key`.
    ///
    /// Fails when `key` is already executing on this stack. Without the
    /// `cycle-detection` feature the check is compiled out and a cycle
    /// manifests as unbounded recursion instead.
    pub fn push(&mut self, key: NodeKey) -> QueryResult<()> {
        #[cfg(feature = "cycle-detection")]
        if self.live.contains(&key) {
            return Err(crate::error::Error::Cycle {
                stack: self.live.clone(),
                key,
            });
        }

        self.live.push(key);
        self.frames.push(UpstreamEdges::default());

        Ok(())
    }

    /// Close the innermost frame and produce its ordered edge list.
    pub fn pop(&mut self) -> Vec<NodeKey> {
        self.live.pop();
        self.frames
            .pop()
            .map(UpstreamEdges::into_edges)
            .unwrap_or_default()
    }

    /// Edges recorded so far in the innermost frame.
    pub fn current(&self) -> &[NodeKey] {
        self.frames
            .last()
            .map(UpstreamEdges::edges)
            .unwrap_or_default()
    }

    /// Keys currently executing, outermost first.
    pub fn live(&self) -> &[NodeKey] {
        &self.live
    }
}

#[cfg(test)]
mod test {
    use super::TraceStack;
    use crate::key::{DynParams, NodeKey, QueryId};

    fn make_key(name: &'static str) -> NodeKey {
        NodeKey::query(QueryId::derive::<(), u32>(name), DynParams::new(()))
    }

    #[test]
    fn test_record_outside_frame_is_dropped() {
        let mut trace = TraceStack::default();

        trace.record(&make_key("a"));

        assert!(trace.current().is_empty());
        assert!(trace.live().is_empty());
    }

    #[test]
    fn test_edges_keep_first_read_order() {
        let mut trace = TraceStack::default();
        trace.push(make_key("root")).unwrap();

        trace.record(&make_key("a"));
        trace.record(&make_key("b"));
        trace.record(&make_key("a"));
        trace.record(&make_key("c"));
        trace.record(&make_key("b"));

        let edges = trace.pop();

        assert_eq!(edges, vec![make_key("a"), make_key("b"), make_key("c")]);
    }

    #[test]
    fn test_nested_frames_are_independent() {
        let mut trace = TraceStack::default();

        trace.push(make_key("outer")).unwrap();
        trace.record(&make_key("a"));

        trace.push(make_key("inner")).unwrap();
        trace.record(&make_key("b"));

        assert_eq!(trace.live(), &[make_key("outer"), make_key("inner")]);
        assert_eq!(trace.pop(), vec![make_key("b")]);

        trace.record(&make_key("c"));
        assert_eq!(trace.pop(), vec![make_key("a"), make_key("c")]);
    }

    #[test]
    fn test_pop_without_frame_is_empty() {
        let mut trace = TraceStack::default();

        assert!(trace.pop().is_empty());
    }

    #[cfg(feature = "cycle-detection")]
    #[test]
    fn test_reentry_is_a_cycle() {
        use crate::error::Error;

        let mut trace = TraceStack::default();

        trace.push(make_key("a")).unwrap();
        trace.push(make_key("b")).unwrap();

        let error = trace.push(make_key("a")).unwrap_err();

        match error {
            Error::Cycle { key, stack } => {
                assert_eq!(key, make_key("a"));
                assert_eq!(stack, vec![make_key("a"), make_key("b")]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }

        // The failed push must not have disturbed the stack.
        assert_eq!(trace.live(), &[make_key("a"), make_key("b")]);
    }
}
