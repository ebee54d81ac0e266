#![deny(missing_docs)]

//! Typed query layer over the Tessera multi-dimensional array engine.
//!
//! Callers describe reads and writes against a named array (a subarray or
//! per-dimension ranges, a cell layout, and typed data buffers) and this
//! crate marshals them through the engine's type-erased execution protocol:
//! it validates element kinds against the array schema, pins buffer storage
//! for the duration of the query, drives submit/status/finalize cycles
//! (including incomplete-result continuation), and reconstructs typed,
//! zero-copy views over the engine's result buffers.
//!
//! ```
//! use tessera::{Array, ArraySchema, ArrayType, Attribute, Context, Datatype,
//!               Dimension, Domain, Layout, Query, QueryType};
//!
//! # fn main() -> tessera::TesseraResult<()> {
//! let ctx = Context::new();
//!
//! let mut domain = Domain::new(&ctx);
//! domain.add_dimension(Dimension::new(&ctx, "x", Datatype::Int32, [1, 4], Some(4))?);
//! let mut schema = ArraySchema::new(&ctx, ArrayType::Dense);
//! schema.set_domain(domain)?;
//! schema.add_attribute(Attribute::new(&ctx, "a", Datatype::Int32)?);
//!
//! let mut array = Array::new(&ctx, "quickstart")?;
//! array.create(schema)?;
//! array.open(QueryType::Write)?;
//!
//! let mut query = Query::new(&ctx, &array)?;
//! query.set_layout(Layout::RowMajor)?;
//! query.set_subarray(&[1i32, 4])?;
//! query.set_buffer("a", vec![10i32, 20, 30, 40])?;
//! query.submit()?;
//! # Ok(())
//! # }
//! ```

pub use array::*;
pub use context::*;
pub use schema::*;
pub use query::*;

pub use tessera_dtype::{
    ArrayType, CellValNum, Datatype, FilterType, Layout, NativeValue, QueryStatus, QueryType,
    ValueKind, COORDS,
};
pub use tessera_error::{TesseraError, TesseraResult};

mod array;
mod context;
mod query;
mod schema;
