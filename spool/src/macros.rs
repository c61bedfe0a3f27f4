//! Shorthands for building and returning [`crate::error::SpoolError`] values.

/// Creates a [`crate::error::SpoolError`] from a kind, a static description and optional detail.
#[macro_export]
macro_rules! spool_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::SpoolError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::SpoolError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::SpoolError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::SpoolError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with a [`crate::error::SpoolError`] built like [`spool_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::spool_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::spool_error!($kind, $desc, $detail))
    };
}
