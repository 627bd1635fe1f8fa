//! Stubs for `tracing` crate functionality.
//!
//! Items in this module serve as proxies to `tracing` crate functionality
//! (as well as the `info!` and `debug!` macros from crate root).
//! When the `tracing` feature is not enabled they turn into no-op.
//!
//! Emission is additionally controlled by the `TARRAGON_TRACE` environment
//! variable: set it to anything but `0` to get output. The flag is
//! consulted once per process and only affects log output, never cache
//! decisions.

/// Whether verbose trace logging was requested for this process.
#[cfg(feature = "tracing")]
pub(crate) fn verbose() -> bool {
    use once_cell::sync::Lazy;

    static VERBOSE: Lazy<bool> = Lazy::new(|| {
        std::env::var_os("TARRAGON_TRACE").map_or(false, |value| value != "0")
    });

    *VERBOSE
}

#[cfg(all(test, feature = "tracing"))]
mod test {
    // `verbose` caches its answer, so the only portable assertion is that
    // repeated calls agree.
    #[test]
    fn test_verbose_is_stable() {
        assert_eq!(super::verbose(), super::verbose());
    }
}
