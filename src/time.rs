//! Types to track and version changes in inputs.
//!
//! This module contains the [`Revision`] token which versions every change
//! made to inputs. There is a single clock for the whole runtime: it
//! advances when (and only when) an input write actually changes a stored
//! value, so two equal revisions always denote the exact same state of all
//! inputs.

/// Time token for tracking changes across all inputs.
///
/// The runtime generates a new unique revision per real input change.
/// Cached values remember the revision they last changed at and the latest
/// revision they were confirmed current at; comparing those tokens is what
/// lets queries skip recalculation.
///
/// The type is implemented as newtype around `u64`.
/// It is not expected to wrap in any practical circumstance, however it will
/// panic if that happens.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default)]
pub struct Revision(u64);

impl Revision {
    /// Generate initial revision.
    ///
    /// This is the state of the clock before any input write.
    pub fn initial() -> Revision {
        Revision(0)
    }

    /// Create a new revision.
    pub fn new(n: u64) -> Revision {
        Revision(n)
    }

    /// Generate next token.
    pub fn next(self) -> Revision {
        Revision(
            self.0
                .checked_add(1)
                .expect("revision arithmetics should not overflow"),
        )
    }
}

#[cfg(test)]
mod test {
    use super::Revision;

    #[test]
    fn test_initial() {
        assert_eq!(Revision::initial(), Revision::new(0));
        assert_eq!(Revision::default(), Revision::initial());
    }

    #[test]
    fn test_next() {
        assert_eq!(Revision::initial().next(), Revision::new(1));
        assert_eq!(Revision::new(41).next(), Revision::new(42));
    }

    #[test]
    fn test_ordering() {
        assert!(Revision::initial() < Revision::initial().next());
        assert!(Revision::new(2) <= Revision::new(2));
        assert!(Revision::new(3) > Revision::new(2));
    }
}
