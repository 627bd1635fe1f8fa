//! Incremental computing for synchronous Rust.
//!
//! # Contents
//!
//! * [Primer](#primer)
//! * [Quick start](#quick-start)
//! * [Required trait bounds](#required-trait-bounds)
//! * [How it works](#how-it-works)
//! * [Features](#features)
//! * [Known limitations](#known-limitations)
//! * [Similar projects](#similar-projects)
//!
//! # Primer
//!
//! * [Incremental computing](https://en.wikipedia.org/wiki/Incremental_computing)
//! * [Adapton][adapton] - research initiative for incremental computing
//! * [`salsa`][salsa] - incremental computation framework this crate owes
//!   its mental model to
//!
//! `tarragon` allows you to define *queries* (functions whose values are
//! cached) and *inputs* ("functions" whose value is set directly by user).
//! Upon execution, queries record which other queries or inputs they
//! called and can avoid recalculation when none of those values change.
//! A query that recalculates to an equal value does not even invalidate
//! its callers.
//!
//! Unlike `salsa`, queries here are resolved dynamically through an
//! explicit registry: a query is declared under a name and called through
//! a cheap copyable handle, so no macros or generated traits are involved.
//!
//! [salsa]: https://github.com/salsa-rs/salsa
//! [adapton]: http://adapton.org/
//!
//! # Quick start
//!
//! 1.  *Declare inputs.*
//!
//!     An input is a handle to storage for values of a specific type.
//!     Inputs can be explicitly set, so they serve as the primary entry
//!     point for user data.
//!
//!     ```
//!     // a keyed family of values...
//!     let grades = tarragon::MapInput::<String, u32>::named("grades");
//!
//!     // ...or a single slot
//!     let passing_bar = tarragon::ScalarInput::<u32>::named("passing bar");
//!     ```
//!
//! 2.  *Create a runtime and register queries.*
//!
//!     Queries are *pure functions* which can call other queries or
//!     inputs through the context they receive.
//!
//!     ```
//!     # let grades = tarragon::MapInput::<String, u32>::named("grades");
//!     # let passing_bar = tarragon::ScalarInput::<u32>::named("passing bar");
//!     let rt = tarragon::Runtime::new();
//!
//!     let passed = rt.register_query("passed", move |cx, name: &String| {
//!         let points = grades.get(name, cx)?;
//!         Ok(points >= passing_bar.get(cx)?)
//!     });
//!     ```
//!
//! 3.  *Set inputs and run.*
//!
//!     ```
//!     # let grades = tarragon::MapInput::<String, u32>::named("grades");
//!     # let passing_bar = tarragon::ScalarInput::<u32>::named("passing bar");
//!     # let rt = tarragon::Runtime::new();
//!     # let passed = rt.register_query("passed", move |cx, name: &String| {
//!     #     let points = grades.get(name, cx)?;
//!     #     Ok(points >= passing_bar.get(cx)?)
//!     # });
//!     rt.set_map(&grades, "John".to_string(), 325);
//!     rt.set_scalar(&passing_bar, 150);
//!
//!     assert!(rt.call(&passed, "John".to_string()).unwrap());
//!
//!     // Equal writes change nothing; cached values stay fresh.
//!     rt.set_scalar(&passing_bar, 150);
//!     assert!(rt.call(&passed, "John".to_string()).unwrap());
//!     ```
//!
//! # Required trait bounds
//!
//! All involved value types are required to implement a selection of
//! traits:
//!
//! *   `Clone` - required to duplicate values out of the cache
//! *   `Eq` - required to determine if values actually changed; this is
//!     also why there is no floating-point special handling; wrap floats
//!     in a type whose `Eq` says what "unchanged" means for you
//! *   `Send` + `Sync` - required to share cached values between threads
//! *   `'static` - required to persist values inside the runtime
//!
//! `Clone + Eq + Send + Sync + 'static` can be quite a mouthful to type,
//! so `tarragon` provides a special [`Stashable`] trait which can be used
//! as a convenient shortcut. Query parameters and map keys additionally
//! require `Hash`.
//!
//! # How it works
//!
//! On important implementation details and how they affect runtime
//! characteristics see the [`runtime`] and [`node`] module-level
//! documentation.
//!
//! # Features
//!
//! This crate provides the following features:
//!
//! *   `cycle-detection` *(default)* - detect dependency cycles between
//!     queries and surface them as [`Error::Cycle`]. When disabled,
//!     dependency recording still functions and a cycle manifests as
//!     unbounded recursion instead.
//! *   `tracing` - enable internal logging via the [`tracing`][docs.rs:tracing]
//!     crate, emitted only when the `TARRAGON_TRACE` environment variable
//!     is set. It gets quite verbose, intended for debugging of `tarragon`
//!     itself. Log contents are not part of SemVer guarantees.
//!
//! [docs.rs:tracing]: https://docs.rs/tracing/latest/tracing/
//!
//! # Known limitations
//!
//! *   No cache eviction.
//!
//!     Cached entries live until their input is removed or the runtime is
//!     dropped. Calling queries with many distinct parameter values grows
//!     the cache without bound.
//!
//! *   No deduplication of concurrent work.
//!
//!     Two threads that request the same cold bound query both run the
//!     calculation; the engine keeps whichever result lands last. For
//!     pure functions both results are equal, so this trades duplicate
//!     work for not having to coordinate.
//!
//! *   No persistence.
//!
//!     The runtime is purely in-memory.
//!
//! # Similar projects
//!
//! * [`salsa`][docs.rs:salsa]
//!
//!     Similarities:
//!     * Both are based on pure functions
//!     * Both use query/input structure and revision-stamped caches
//!
//!     Key differences:
//!     *   `salsa`'s queries are resolved statically via traits and
//!         macro-generated storage.
//!
//!         `tarragon`'s queries are resolved dynamically through an
//!         explicit registry, i.e. you can register any query on any
//!         runtime at any time.
//!
//! * [`comemo`][docs.rs:comemo]
//!
//!     Similarities:
//!     * Both memoize pure functions and track what they actually read
//!
//!     Key differences:
//!     *   `comemo` validates by replaying recorded constraints against
//!         the current arguments; `tarragon` validates by comparing
//!         revision stamps along recorded dependency edges.
//!
//! [docs.rs:salsa]: https://docs.rs/salsa/latest/salsa/
//! [docs.rs:comemo]: https://docs.rs/comemo/latest/comemo/
#![warn(missing_docs)]
#![allow(dead_code)]

macro_rules! info {
    ($($t:tt)*) => {
        #[cfg(feature = "tracing")]
        if $crate::tracing::verbose() {
            ::tracing::info!($($t)*)
        }
    }
}

macro_rules! debug {
    ($($t:tt)*) => {
        #[cfg(feature = "tracing")]
        if $crate::tracing::verbose() {
            ::tracing::debug!($($t)*)
        }
    }
}

pub mod node;
pub mod runtime;

mod error;
mod key;
mod trace;

pub(crate) mod time;
pub(crate) mod tracing;

pub use error::{Error, QueryResult};
pub use key::{InputId, NodeId, NodeKey, QueryId};
pub use node::input::{MapInput, ScalarInput};
pub use node::query::QueryHandle;
pub use runtime::{QueryContext, Runtime};
pub use time::Revision;

/// A shortcut for `Clone + Eq + Send + Sync + 'static`.
///
/// This trait is an umbrella for all trait bounds required for value types
/// flowing in or out of the runtime. See [crate level](self#required-trait-bounds)
/// documentation for more details.
///
/// The purpose of this trait is to reduce boilerplate and chances of
/// accidentally forgetting some bound in generic context. It is
/// recommended to use the trait over specifying every bound individually.
pub trait Stashable: Clone + Eq + Send + Sync + 'static {}

impl<T> Stashable for T where T: Clone + Eq + Send + Sync + 'static {}

// Test examples from README.
#[doc = include_str!("../README.md")]
#[doc(hidden)]
const _: () = ();
