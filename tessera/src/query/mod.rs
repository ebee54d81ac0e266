use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use tessera_dtype::{Datatype, Layout, QueryStatus, QueryType, COORDS};
use tessera_engine::{ArrayStore, DimensionData, QueryHandle};
use tessera_error::{tessera_bail, tessera_err, TesseraResult};

use self::buffer::BufferEntry;
use crate::{Array, Context};

pub use range::{RangeLimits, RangeValue};

mod buffer;
mod range;
mod view;

/// Why a read came back [`QueryStatus::Incomplete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteReason {
    /// Partial results were delivered; drain the buffers and resubmit to
    /// continue.
    BufferCapacity,
    /// Not even one result fit: every bound buffer reported zero bytes.
    /// Enlarge the buffers, rebind them, and resubmit.
    BuffersTooSmall,
}

/// [`QueryStatus`] with the incomplete case made explicit, so callers do
/// not have to infer the enlarge-and-resubmit obligation from zeroed
/// result sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatusDetails {
    /// Query failed.
    Failed,
    /// All requested data was produced.
    Completed,
    /// Still executing; poll again.
    InProgress,
    /// Terminated early; see [`IncompleteReason`].
    Incomplete(IncompleteReason),
    /// Not submitted yet.
    Uninitialized,
}

/// A read or write query against one open array.
///
/// A query is configured through the range and buffer binding methods,
/// executed with [`Query::submit`] or [`Query::submit_async`], and
/// inspected through the typed view and size methods. Configuration and
/// execution take `&mut self`, views take `&self`: binding a buffer during
/// a submit, or holding a result view across one, is a compile error
/// rather than a documented hazard. The exception is
/// [`Query::submit_async`], which returns while the engine still holds the
/// registered buffers; touching result views before [`Query::status`]
/// leaves `InProgress` is a caller error.
///
/// Dropping the query (or calling [`Query::free`]) releases the engine
/// handle and every pinned buffer. Freeing a query while a submit is in
/// progress is undefined, as in the underlying engine.
#[derive(Debug)]
pub struct Query {
    context: Context,
    store: Arc<ArrayStore>,
    query_type: QueryType,
    handle: Option<QueryHandle>,
    buffers: HashMap<String, BufferEntry>,
}

impl Query {
    /// Create a query against an open array, inheriting the query type the
    /// array was opened with.
    pub fn new(ctx: &Context, array: &Array) -> TesseraResult<Self> {
        let query_type = array.query_type()?;
        let store = Arc::clone(array.store()?);
        let handle = QueryHandle::new(Arc::clone(&store), query_type);
        trace!("created {} query against '{}'", query_type, array.uri());
        Ok(Self {
            context: ctx.clone(),
            store,
            query_type,
            handle: Some(handle),
            buffers: HashMap::new(),
        })
    }

    /// Select the cell layout for reads and writes.
    pub fn set_layout(&mut self, layout: Layout) -> TesseraResult<()> {
        let handle = self.handle()?;
        self.context.engine_result(handle.set_layout(layout))
    }

    /// Execute the query, blocking until it completes, fails, or reports
    /// an incomplete result.
    ///
    /// After an [`QueryStatus::Incomplete`] read, drain the delivered
    /// results, rebind (possibly enlarged) buffers, and submit again; the
    /// engine preserves range and layout configuration and continues where
    /// it stopped. Submitting again after [`QueryStatus::Completed`]
    /// re-executes from the start. Global-order writes additionally
    /// require [`Query::finalize`] after the last submit.
    pub fn submit(&mut self) -> TesseraResult<()> {
        let handle = self.handle()?;
        self.context.engine_result(handle.submit())
    }

    /// Start executing without blocking.
    ///
    /// The engine provides no completion callback; the only progress
    /// signal is polling [`Query::status`] until it leaves
    /// [`QueryStatus::InProgress`].
    pub fn submit_async(&mut self) -> TesseraResult<()> {
        let handle = self.handle()?;
        self.context.engine_result(handle.submit_async())
    }

    /// The query's current status.
    pub fn status(&self) -> TesseraResult<QueryStatus> {
        Ok(self.handle()?.status())
    }

    /// The query's status with the incomplete case made explicit.
    pub fn status_details(&self) -> TesseraResult<QueryStatusDetails> {
        Ok(match self.status()? {
            QueryStatus::Failed => QueryStatusDetails::Failed,
            QueryStatus::Completed => QueryStatusDetails::Completed,
            QueryStatus::InProgress => QueryStatusDetails::InProgress,
            QueryStatus::Uninitialized => QueryStatusDetails::Uninitialized,
            QueryStatus::Incomplete => {
                let starved = self
                    .buffers
                    .values()
                    .all(|e| e.data_bytes() == 0 && e.offset_bytes() == 0);
                QueryStatusDetails::Incomplete(if starved {
                    IncompleteReason::BuffersTooSmall
                } else {
                    IncompleteReason::BufferCapacity
                })
            }
        })
    }

    /// The query type, fixed at creation.
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Whether the last submit of a read query produced any results.
    /// Always false for write queries.
    pub fn has_results(&self) -> TesseraResult<bool> {
        Ok(self.handle()?.has_results())
    }

    /// Flush and conclude the query. Required after the last submit of a
    /// global-order write; a legal no-op for every other layout.
    ///
    /// Finalizing drops every buffer pin and zeroes the recorded result
    /// sizes; previously bound fields report zero elements until rebound.
    pub fn finalize(&mut self) -> TesseraResult<()> {
        let handle = self.handle()?;
        self.context.engine_result(handle.finalize())?;
        for entry in self.buffers.values_mut() {
            entry.invalidate();
        }
        Ok(())
    }

    /// Release the engine handle and every pinned buffer. Idempotent and
    /// also performed on drop.
    pub fn free(&mut self) {
        if self.handle.take().is_some() {
            trace!("freed query against '{}'", self.store.uri());
        }
        self.buffers.clear();
    }

    pub(crate) fn handle(&self) -> TesseraResult<&QueryHandle> {
        match &self.handle {
            Some(h) => Ok(h),
            None => tessera_bail!(InvalidArgument: "query has been freed"),
        }
    }

    /// Resolve a field name against the live schema: the coordinate
    /// sentinel first, then dimensions, then attributes. Re-resolved on
    /// every bind because sparse arrays materialize the coordinate field
    /// only after a first write.
    pub(crate) fn field_datatype(&self, field: &str) -> TesseraResult<Datatype> {
        let schema = self.store.schema();
        if field == COORDS {
            return schema
                .domain
                .datatype()
                .map_err(|e| tessera_err!(UnsupportedOperation: "{}", e));
        }
        if let Some(dim) = schema.domain.dimension(field) {
            return Ok(dim.datatype);
        }
        match schema.attribute(field) {
            Some(attr) => Ok(attr.datatype),
            None => tessera_bail!(NotFound: "no dimension or attribute named '{}'", field),
        }
    }

    pub(crate) fn dimension_data(&self, index: u32) -> TesseraResult<&DimensionData> {
        let dims = &self.store.schema().domain.dimensions;
        match dims.get(index as usize) {
            Some(d) => Ok(d),
            None => tessera_bail!(NotFound:
                "dimension index {} out of bounds ({} dimensions)", index, dims.len()),
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod test {
    use tessera_dtype::{ArrayType, Datatype, Layout, QueryStatus, QueryType};
    use tessera_error::TesseraError;

    use crate::{Array, ArraySchema, Attribute, Context, Dimension, Domain, Query};

    pub(crate) fn dense_1d(ctx: &Context, uri: &str) -> Array {
        let mut domain = Domain::new(ctx);
        domain.add_dimension(
            Dimension::new(ctx, "x", Datatype::Int32, [1, 8], Some(4)).unwrap(),
        );
        let mut schema = ArraySchema::new(ctx, ArrayType::Dense);
        schema.set_domain(domain).unwrap();
        schema.add_attribute(Attribute::new(ctx, "a", Datatype::Int32).unwrap());
        let array = Array::new(ctx, uri).unwrap();
        array.create(schema).unwrap();
        array
    }

    #[test]
    fn inherits_query_type_from_open_array() {
        let ctx = Context::new();
        let mut array = dense_1d(&ctx, "qt");

        assert!(Query::new(&ctx, &array).is_err());

        array.open(QueryType::Write).unwrap();
        let query = Query::new(&ctx, &array).unwrap();
        assert_eq!(query.query_type(), QueryType::Write);
        assert_eq!(query.status().unwrap(), QueryStatus::Uninitialized);
    }

    #[test]
    fn free_is_idempotent() {
        let ctx = Context::new();
        let mut array = dense_1d(&ctx, "free");
        array.open(QueryType::Read).unwrap();

        let mut query = Query::new(&ctx, &array).unwrap();
        query.set_buffer("a", vec![0i32; 8]).unwrap();
        query.free();
        query.free();
        assert!(matches!(
            query.set_layout(Layout::RowMajor),
            Err(TesseraError::InvalidArgument(_))
        ));
        assert!(query.status().is_err());
        drop(query);
    }
}
