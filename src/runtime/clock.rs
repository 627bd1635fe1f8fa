//! Revision clock and the quiescence guard.
//!
//! The clock is the single notion of time in the runtime. It advances only
//! when an input write actually changes a stored value, and it can never
//! advance while a query computation is active anywhere: every lookup
//! raises the active count for its duration, and the write path asserts
//! the count is zero before moving the clock. That is what lets a
//! computation read the current revision once and trust it until it
//! finishes.

use std::fmt::{self, Debug};

use crate::runtime::Runtime;
use crate::time::Revision;

/// Internal clock state: the current revision plus the number of query
/// computations executing anywhere.
pub(crate) struct Clock {
    current: Revision,
    active_queries: u32,
}

impl Clock {
    pub fn new() -> Clock {
        Clock {
            current: Revision::initial(),
            active_queries: 0,
        }
    }

    /// Revision observed by everything running right now.
    pub fn current(&self) -> Revision {
        self.current
    }

    /// Mark a query computation as started and pin the revision it runs at.
    pub fn begin_query(&mut self) -> Revision {
        self.active_queries = self
            .active_queries
            .checked_add(1)
            .expect("active query count should not overflow");

        self.current
    }

    /// Mark a query computation as finished.
    pub fn end_query(&mut self) {
        self.active_queries = self
            .active_queries
            .checked_sub(1)
            .expect("every query end should pair with a begin");
    }

    /// Advance the clock for an input write.
    ///
    /// # Panics
    ///
    /// Panics when any query computation is active: a write that lands
    /// mid-computation would let one computation observe two revisions.
    pub fn advance_for_write(&mut self) -> Revision {
        assert_eq!(
            self.active_queries, 0,
            "input mutated while a query computation is active"
        );

        self.current = self.current.next();
        self.current
    }

    #[cfg(test)]
    pub fn active_queries(&self) -> u32 {
        self.active_queries
    }
}

impl Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(Clock))
            .field("current", &self.current)
            .field("active_queries", &self.active_queries)
            .finish()
    }
}

/// Guard keeping the runtime's active-computation count raised.
///
/// The revision is pinned at construction and stays authoritative until
/// the guard drops; dropping lowers the count again on every exit path,
/// panics included.
pub(crate) struct ActiveQuery<'rt> {
    rt: &'rt Runtime,
    revision: Revision,
}

impl<'rt> ActiveQuery<'rt> {
    pub(crate) fn new(rt: &'rt Runtime, revision: Revision) -> Self {
        ActiveQuery { rt, revision }
    }

    /// Revision pinned for the duration of this computation.
    pub(crate) fn revision(&self) -> Revision {
        self.revision
    }
}

impl Drop for ActiveQuery<'_> {
    fn drop(&mut self) {
        self.rt.end_query();
    }
}

impl Debug for ActiveQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(stringify!(ActiveQuery))
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::Clock;
    use crate::time::Revision;

    #[test]
    fn test_advance() {
        let mut clock = Clock::new();

        assert_eq!(clock.current(), Revision::initial());
        assert_eq!(clock.advance_for_write(), Revision::new(1));
        assert_eq!(clock.advance_for_write(), Revision::new(2));
        assert_eq!(clock.current(), Revision::new(2));
    }

    #[test]
    fn test_begin_pins_current_revision() {
        let mut clock = Clock::new();
        clock.advance_for_write();

        assert_eq!(clock.begin_query(), Revision::new(1));
        assert_eq!(clock.begin_query(), Revision::new(1));
        assert_eq!(clock.active_queries(), 2);

        clock.end_query();
        clock.end_query();
        assert_eq!(clock.active_queries(), 0);
    }

    #[test]
    #[should_panic(expected = "input mutated while a query computation is active")]
    fn test_write_requires_quiescence() {
        let mut clock = Clock::new();

        clock.begin_query();
        clock.advance_for_write();
    }

    #[test]
    #[should_panic(expected = "every query end should pair with a begin")]
    fn test_unpaired_end() {
        let mut clock = Clock::new();

        clock.end_query();
    }
}
