//! Logging shim: forwards to `defmt` or `log` depending on the enabled
//! feature, and compiles to nothing when neither is selected.
//!
//! The diagnostic sink never affects state; every call site must behave
//! identically with logging compiled out.

#![allow(unused_macros)]

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("features `defmt` and `log` are mutually exclusive");

macro_rules! trace {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg),*);
        #[cfg(feature = "log")]
        ::log::trace!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! debug {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg),*);
        #[cfg(feature = "log")]
        ::log::debug!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! info {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg),*);
        #[cfg(feature = "log")]
        ::log::info!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! warn {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg),*);
        #[cfg(feature = "log")]
        ::log::warn!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}

macro_rules! error {
    ($($arg:expr),* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg),*);
        #[cfg(feature = "log")]
        ::log::error!($($arg),*);
        #[cfg(not(any(feature = "defmt", feature = "log")))]
        let _ = ($(&$arg),*);
    }};
}
