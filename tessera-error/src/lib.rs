#![deny(missing_docs)]

//! Error handling for Tessera.
//!
//! This crate defines the error taxonomy shared by every Tessera crate,
//! along with macros for constructing and returning errors.

use std::fmt::Display;

pub use ext::*;

mod ext;

/// A type alias for results that may fail with a [`TesseraError`].
pub type TesseraResult<T> = Result<T, TesseraError>;

/// The errors surfaced by the Tessera query layer.
///
/// `EngineFailure` carries the storage engine's own last-error text
/// verbatim; every other variant originates in the binding layer before an
/// engine call is made.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TesseraError {
    /// A buffer or range element kind disagrees with the declared datatype
    /// of the field or dimension it is bound against.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The datatype is part of the registry but not usable for the
    /// attempted operation (e.g. it has no fixed byte width).
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A zero-length buffer was passed where pre-sized storage is required.
    #[error("empty buffer: {0}")]
    EmptyBuffer(String),

    /// An unknown field or dimension name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Schema metadata could not be read, typically because the array is
    /// not open.
    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// The storage engine reported an error; the message is the engine's
    /// last-error text.
    #[error("engine failure: {0}")]
    EngineFailure(String),

    /// The operation is permanently unsupported for the given inputs, as
    /// opposed to a transient failure.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// An argument with the wrong shape (length, alignment, pairing).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Construct a [`TesseraError`] from a format string, optionally prefixed
/// with the variant name.
///
/// ```
/// use tessera_error::{tessera_err, TesseraError};
/// let e = tessera_err!(NotFound: "no attribute named {}", "a");
/// assert!(matches!(e, TesseraError::NotFound(_)));
/// ```
#[macro_export]
macro_rules! tessera_err {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::TesseraError::$variant(format!($fmt $(, $arg)*))
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::tessera_err!(InvalidArgument: $fmt $(, $arg)*)
    };
}

/// Return early with a [`TesseraError`], as constructed by [`tessera_err!`].
#[macro_export]
macro_rules! tessera_bail {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        return Err($crate::tessera_err!($variant: $fmt $(, $arg)*))
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        return Err($crate::tessera_err!($fmt $(, $arg)*))
    };
}

/// Panic with a formatted message. Reserved for invariant violations that
/// indicate a bug in Tessera itself, never for caller errors.
#[macro_export]
macro_rules! tessera_panic {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        ::std::panic!($fmt $(, $arg)*)
    };
}

impl TesseraError {
    /// The inner message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::TypeMismatch(s)
            | Self::UnsupportedType(s)
            | Self::EmptyBuffer(s)
            | Self::NotFound(s)
            | Self::SchemaUnavailable(s)
            | Self::EngineFailure(s)
            | Self::UnsupportedOperation(s)
            | Self::InvalidArgument(s) => s,
        }
    }
}

/// Unwrap helpers that funnel through [`tessera_panic!`] so that invariant
/// violations produce a uniform message shape.
pub trait TesseraExpect {
    /// The unwrapped value type.
    type Output;

    /// Unwrap, panicking with `msg` on failure.
    fn tessera_expect(self, msg: &str) -> Self::Output;
}

impl<T> TesseraExpect for Option<T> {
    type Output = T;

    fn tessera_expect(self, msg: &str) -> T {
        match self {
            Some(v) => v,
            None => tessera_panic!("expected Some: {}", msg),
        }
    }
}

impl<T, E: Display> TesseraExpect for Result<T, E> {
    type Output = T;

    fn tessera_expect(self, msg: &str) -> T {
        match self {
            Ok(v) => v,
            Err(e) => tessera_panic!("expected Ok: {}: {}", msg, e),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{TesseraError, TesseraExpect, TesseraResult};

    #[test]
    fn err_macro_variants() {
        let e = tessera_err!(TypeMismatch: "buffer {} vs field {}", "u32", "i32");
        assert!(matches!(e, TesseraError::TypeMismatch(_)));
        assert_eq!(e.message(), "buffer u32 vs field i32");

        let e = tessera_err!("bad length {}", 3);
        assert!(matches!(e, TesseraError::InvalidArgument(_)));
    }

    #[test]
    fn bail_returns_err() {
        fn inner() -> TesseraResult<()> {
            tessera_bail!(EmptyBuffer: "no capacity");
        }
        assert!(matches!(inner(), Err(TesseraError::EmptyBuffer(_))));
    }

    #[test]
    fn expect_passes_through() {
        assert_eq!(Some(3).tessera_expect("three"), 3);
        let ok: Result<i32, TesseraError> = Ok(4);
        assert_eq!(ok.tessera_expect("four"), 4);
    }
}
