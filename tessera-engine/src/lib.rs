#![deny(missing_docs)]

//! The Tessera storage engine.
//!
//! An in-memory multi-dimensional array store behind the narrow protocol
//! the query layer drives: type-erased buffer registration (raw address
//! plus a byte-size cell), per-dimension range registration, layout
//! selection, blocking and poll-based asynchronous submission, and
//! finalization for global-order writes.
//!
//! Everything in this crate is deliberately opaque to callers of the query
//! layer: buffers cross this boundary as `*mut u8` and `*mut u64`, never as
//! typed slices. The query layer owns all type validation; this crate only
//! checks what the storage format itself requires (field existence,
//! fixed/variable form, byte widths).

pub use array::*;
pub use error::*;
pub use query::*;
pub use schema::*;

mod array;
mod cells;
mod error;
mod exec;
mod query;
mod scalar;
mod schema;
