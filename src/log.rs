//! Internal logging macros.
//!
//! Forward to `tracing` when the `tracing` feature is enabled and expand to
//! nothing otherwise, so the dependency stays optional. Declared first in
//! `lib.rs` with `#[macro_use]` so the macros are in textual scope everywhere.

macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)*);
        }
    };
}

macro_rules! info {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::info!($($arg)*);
        }
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)*);
        }
    };
}
