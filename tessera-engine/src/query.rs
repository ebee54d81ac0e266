use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;
use tessera_dtype::{CellValNum, Layout, QueryStatus, QueryType, COORDS};

use crate::array::ArrayStore;
use crate::error::{engine_bail, EngineResult};
use crate::exec;
use crate::schema::{AttributeData, DimensionData, SchemaData};

/// A raw pointer that may be moved to the background execution thread.
/// The registration contract requires the memory to stay valid and
/// unaliased for as long as the engine holds it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendPtr<T>(*mut T);

unsafe impl<T> Send for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub(crate) fn get(self) -> *mut T {
        self.0
    }
}

/// Offsets half of a variable-sized registration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawOffsets {
    pub(crate) ptr: SendPtr<u64>,
    pub(crate) size: SendPtr<u64>,
    pub(crate) capacity: u64,
}

/// One registered buffer: address, the caller-owned byte-size cell, and
/// the capacity snapshotted from that cell at registration time. The
/// engine writes bytes-used back through the cell at every submit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBinding {
    pub(crate) data: SendPtr<u8>,
    pub(crate) data_size: SendPtr<u64>,
    pub(crate) data_capacity: u64,
    pub(crate) offsets: Option<RawOffsets>,
}

/// One registered range: raw endpoint bytes, fixed-width scalars for
/// fixed dimensions, arbitrary-length byte strings for variable ones.
#[derive(Debug, Clone)]
pub(crate) struct RangeBytes {
    pub(crate) start: Vec<u8>,
    pub(crate) end: Vec<u8>,
}

/// A planned read: the matching cells in delivery order plus the
/// continuation cursor incomplete submits resume from.
#[derive(Debug)]
pub(crate) struct ReadPlan {
    pub(crate) cells: Vec<crate::cells::CellKey>,
    pub(crate) cursor: usize,
    pub(crate) epoch: u64,
}

#[derive(Debug)]
pub(crate) struct QueryState {
    pub(crate) layout: Layout,
    pub(crate) ranges: Vec<Vec<RangeBytes>>,
    pub(crate) buffers: HashMap<String, RawBinding>,
    pub(crate) plan: Option<ReadPlan>,
    /// Bumped on every range/layout change; a stale plan is rebuilt.
    pub(crate) epoch: u64,
    /// Cells written so far by a global-order write.
    pub(crate) global_cursor: u64,
    /// Cells delivered by the last submit.
    pub(crate) delivered: u64,
}

#[derive(Debug)]
struct Shared {
    status: AtomicU8,
    state: Mutex<QueryState>,
}

/// A field name resolved against a schema: the coordinate sentinel, a
/// dimension, or an attribute, checked in that order; first match wins.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResolvedField<'a> {
    Coords,
    Dimension(usize, &'a DimensionData),
    Attribute(&'a AttributeData),
}

pub(crate) fn resolve_field<'a>(
    schema: &'a SchemaData,
    name: &str,
) -> EngineResult<ResolvedField<'a>> {
    if name == COORDS {
        return Ok(ResolvedField::Coords);
    }
    if let Some(at) = schema
        .domain
        .dimensions
        .iter()
        .position(|d| d.name == name)
    {
        return Ok(ResolvedField::Dimension(at, &schema.domain.dimensions[at]));
    }
    match schema.attribute(name) {
        Some(attr) => Ok(ResolvedField::Attribute(attr)),
        None => engine_bail!("no dimension or attribute named '{}'", name),
    }
}

/// One query against an open array.
///
/// The handle exposes the engine's narrow, type-erased protocol: buffers
/// are registered as raw addresses with caller-owned byte-size cells, and
/// execution is driven by submit/status/finalize. All methods lock
/// internal state; callers serialize their own configure-submit-inspect
/// cycles.
#[derive(Debug)]
pub struct QueryHandle {
    array: Arc<ArrayStore>,
    query_type: QueryType,
    shared: Arc<Shared>,
}

impl QueryHandle {
    /// Create a query of the given type against an open array.
    pub fn new(array: Arc<ArrayStore>, query_type: QueryType) -> Self {
        let ndim = array.schema().domain.ndim() as usize;
        Self {
            array,
            query_type,
            shared: Arc::new(Shared {
                status: AtomicU8::new(QueryStatus::Uninitialized.into()),
                state: Mutex::new(QueryState {
                    layout: Layout::RowMajor,
                    ranges: vec![Vec::new(); ndim],
                    buffers: HashMap::new(),
                    plan: None,
                    epoch: 0,
                    global_cursor: 0,
                    delivered: 0,
                }),
            }),
        }
    }

    /// The query's fixed type.
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// The array this query executes against.
    pub fn array(&self) -> &Arc<ArrayStore> {
        &self.array
    }

    /// Current status. The only progress signal for asynchronous submits.
    pub fn status(&self) -> QueryStatus {
        let raw = self.shared.status.load(Ordering::Acquire);
        QueryStatus::try_from(raw).unwrap_or(QueryStatus::Failed)
    }

    fn set_status(&self, status: QueryStatus) {
        self.shared.status.store(status.into(), Ordering::Release);
    }

    fn guard_not_running(&self) -> EngineResult<()> {
        if self.status() == QueryStatus::InProgress {
            engine_bail!("query is executing; configuration is frozen");
        }
        Ok(())
    }

    /// Register a fixed-size buffer for `field`.
    ///
    /// `data_size` must point to a cell holding the buffer's byte capacity;
    /// the engine snapshots the capacity now and writes bytes-used back
    /// through the cell at every submit.
    ///
    /// # Safety
    ///
    /// `data` must stay valid and unaliased for `*data_size` bytes, and
    /// `data_size` must stay valid, until the query is finalized, freed, or
    /// the field is re-registered.
    pub unsafe fn set_buffer(
        &self,
        field: &str,
        data: *mut u8,
        data_size: *mut u64,
    ) -> EngineResult<()> {
        self.guard_not_running()?;
        let resolved = resolve_field(self.array.schema(), field)?;
        let cell_val_num = match resolved {
            ResolvedField::Coords => CellValNum::single(),
            ResolvedField::Dimension(_, d) => d.cell_val_num,
            ResolvedField::Attribute(a) => a.cell_val_num,
        };
        if cell_val_num.is_var() {
            engine_bail!(
                "field '{}' is variable-sized and requires an offsets buffer",
                field
            );
        }
        let capacity = unsafe { *data_size };
        trace!("registering buffer for '{}' ({} bytes)", field, capacity);
        self.shared.state.lock().buffers.insert(
            field.to_string(),
            RawBinding {
                data: SendPtr(data),
                data_size: SendPtr(data_size),
                data_capacity: capacity,
                offsets: None,
            },
        );
        Ok(())
    }

    /// Register an offsets/data buffer pair for a variable-sized `field`.
    ///
    /// # Safety
    ///
    /// As [`QueryHandle::set_buffer`], for both registered regions.
    pub unsafe fn set_buffer_var(
        &self,
        field: &str,
        offsets: *mut u64,
        offsets_size: *mut u64,
        data: *mut u8,
        data_size: *mut u64,
    ) -> EngineResult<()> {
        self.guard_not_running()?;
        let resolved = resolve_field(self.array.schema(), field)?;
        let cell_val_num = match resolved {
            ResolvedField::Coords => {
                engine_bail!("the coordinate field is never variable-sized")
            }
            ResolvedField::Dimension(_, d) => d.cell_val_num,
            ResolvedField::Attribute(a) => a.cell_val_num,
        };
        if !cell_val_num.is_var() {
            engine_bail!("field '{}' is fixed-size; register a data buffer only", field);
        }
        let data_capacity = unsafe { *data_size };
        let offsets_capacity = unsafe { *offsets_size };
        trace!(
            "registering var buffer for '{}' ({} offset bytes, {} data bytes)",
            field,
            offsets_capacity,
            data_capacity
        );
        self.shared.state.lock().buffers.insert(
            field.to_string(),
            RawBinding {
                data: SendPtr(data),
                data_size: SendPtr(data_size),
                data_capacity,
                offsets: Some(RawOffsets {
                    ptr: SendPtr(offsets),
                    size: SendPtr(offsets_size),
                    capacity: offsets_capacity,
                }),
            },
        );
        Ok(())
    }

    /// The registered data buffer for `field`, or `None` if the field was
    /// never registered. The reported address is authoritative for result
    /// access.
    pub fn get_buffer(&self, field: &str) -> Option<(*mut u8, *mut u64)> {
        self.shared
            .state
            .lock()
            .buffers
            .get(field)
            .map(|b| (b.data.get(), b.data_size.get()))
    }

    /// The registered offsets and data buffers for a variable-sized
    /// `field`, or `None` if the field was never registered with offsets.
    pub fn get_buffer_var(&self, field: &str) -> Option<(*mut u64, *mut u64, *mut u8, *mut u64)> {
        self.shared.state.lock().buffers.get(field).and_then(|b| {
            b.offsets
                .map(|o| (o.ptr.get(), o.size.get(), b.data.get(), b.data_size.get()))
        })
    }

    /// Register a scalar range on dimension `dim_idx`. Endpoint widths are
    /// taken from the dimension's datatype.
    ///
    /// # Safety
    ///
    /// `start` and `end` must each point to one scalar of the dimension's
    /// datatype.
    pub unsafe fn add_range(
        &self,
        dim_idx: u32,
        start: *const u8,
        end: *const u8,
    ) -> EngineResult<()> {
        self.guard_not_running()?;
        let dim = self.dimension(dim_idx)?;
        if dim.cell_val_num.is_var() {
            engine_bail!(
                "dimension '{}' is variable-sized; ranges take explicit lengths",
                dim.name
            );
        }
        let width = dim
            .datatype
            .byte_width()
            .map_err(|e| crate::error::engine_err!("{}", e))? as usize;
        let range = RangeBytes {
            start: unsafe { std::slice::from_raw_parts(start, width) }.to_vec(),
            end: unsafe { std::slice::from_raw_parts(end, width) }.to_vec(),
        };
        let mut state = self.shared.state.lock();
        state.ranges[dim_idx as usize].push(range);
        state.epoch += 1;
        Ok(())
    }

    /// Register a byte range on a variable-sized dimension.
    ///
    /// # Safety
    ///
    /// `start` and `end` must be valid for the given lengths.
    pub unsafe fn add_range_var(
        &self,
        dim_idx: u32,
        start: *const u8,
        start_len: u64,
        end: *const u8,
        end_len: u64,
    ) -> EngineResult<()> {
        self.guard_not_running()?;
        let dim = self.dimension(dim_idx)?;
        if !dim.cell_val_num.is_var() {
            engine_bail!("dimension '{}' is fixed-size; use scalar ranges", dim.name);
        }
        let range = RangeBytes {
            start: unsafe { std::slice::from_raw_parts(start, start_len as usize) }.to_vec(),
            end: unsafe { std::slice::from_raw_parts(end, end_len as usize) }.to_vec(),
        };
        let mut state = self.shared.state.lock();
        state.ranges[dim_idx as usize].push(range);
        state.epoch += 1;
        Ok(())
    }

    /// Number of ranges registered on dimension `dim_idx`.
    pub fn range_num(&self, dim_idx: u32) -> EngineResult<u64> {
        self.dimension(dim_idx)?;
        Ok(self.shared.state.lock().ranges[dim_idx as usize].len() as u64)
    }

    /// Raw endpoints of a registered fixed-width range. The pointers stay
    /// valid until the query's ranges are modified or the query is dropped.
    pub fn get_range(&self, dim_idx: u32, range_idx: u64) -> EngineResult<(*const u8, *const u8)> {
        let state = self.shared.state.lock();
        let range = Self::range_at(&state, dim_idx, range_idx)?;
        Ok((range.start.as_ptr(), range.end.as_ptr()))
    }

    /// Byte lengths of the endpoints of a registered range.
    pub fn get_range_var_size(&self, dim_idx: u32, range_idx: u64) -> EngineResult<(u64, u64)> {
        let state = self.shared.state.lock();
        let range = Self::range_at(&state, dim_idx, range_idx)?;
        Ok((range.start.len() as u64, range.end.len() as u64))
    }

    /// Copy the endpoints of a registered range into caller storage.
    ///
    /// # Safety
    ///
    /// `start_out` and `end_out` must be valid for the lengths reported by
    /// [`QueryHandle::get_range_var_size`].
    pub unsafe fn get_range_var(
        &self,
        dim_idx: u32,
        range_idx: u64,
        start_out: *mut u8,
        end_out: *mut u8,
    ) -> EngineResult<()> {
        let state = self.shared.state.lock();
        let range = Self::range_at(&state, dim_idx, range_idx)?;
        unsafe {
            std::ptr::copy_nonoverlapping(range.start.as_ptr(), start_out, range.start.len());
            std::ptr::copy_nonoverlapping(range.end.as_ptr(), end_out, range.end.len());
        }
        Ok(())
    }

    /// Replace all ranges with one per dimension read from an inclusive
    /// bounding box of `2 * ndim` scalars, each in its dimension's
    /// datatype.
    ///
    /// # Safety
    ///
    /// `subarray` must point to `2 * ndim` scalars laid out per dimension.
    pub unsafe fn set_subarray(&self, subarray: *const u8) -> EngineResult<()> {
        self.guard_not_running()?;
        let schema = self.array.schema();
        let mut ranges = Vec::with_capacity(schema.domain.dimensions.len());
        let mut at = subarray;
        for dim in &schema.domain.dimensions {
            if dim.cell_val_num.is_var() {
                engine_bail!(
                    "subarrays are not supported over variable-sized dimension '{}'",
                    dim.name
                );
            }
            let width = dim
                .datatype
                .byte_width()
                .map_err(|e| crate::error::engine_err!("{}", e))? as usize;
            let start = unsafe { std::slice::from_raw_parts(at, width) }.to_vec();
            let end = unsafe { std::slice::from_raw_parts(at.add(width), width) }.to_vec();
            at = unsafe { at.add(2 * width) };
            ranges.push(vec![RangeBytes { start, end }]);
        }
        let mut state = self.shared.state.lock();
        state.ranges = ranges;
        state.epoch += 1;
        Ok(())
    }

    /// Select the cell layout for this query.
    pub fn set_layout(&self, layout: Layout) -> EngineResult<()> {
        self.guard_not_running()?;
        let mut state = self.shared.state.lock();
        state.layout = layout;
        state.epoch += 1;
        Ok(())
    }

    /// Execute the query, blocking until completion, incompleteness, or
    /// failure.
    pub fn submit(&self) -> EngineResult<()> {
        self.guard_not_running()?;
        self.set_status(QueryStatus::InProgress);
        debug!(
            "submitting {} query against '{}'",
            self.query_type,
            self.array.uri()
        );
        let outcome = {
            let mut state = self.shared.state.lock();
            exec::execute(&self.array, self.query_type, &mut state)
        };
        match outcome {
            Ok(status) => {
                self.set_status(status);
                Ok(())
            }
            Err(e) => {
                self.set_status(QueryStatus::Failed);
                Err(e)
            }
        }
    }

    /// Start executing without blocking. There is no completion callback;
    /// the caller polls [`QueryHandle::status`] until it leaves
    /// `InProgress`.
    pub fn submit_async(&self) -> EngineResult<()> {
        self.guard_not_running()?;
        self.set_status(QueryStatus::InProgress);
        debug!(
            "submitting {} query against '{}' (async)",
            self.query_type,
            self.array.uri()
        );
        let array = Arc::clone(&self.array);
        let shared = Arc::clone(&self.shared);
        let query_type = self.query_type;
        std::thread::spawn(move || {
            let outcome = {
                let mut state = shared.state.lock();
                exec::execute(&array, query_type, &mut state)
            };
            let status = match outcome {
                Ok(status) => status,
                Err(e) => {
                    debug!("async submit failed: {}", e);
                    QueryStatus::Failed
                }
            };
            shared.status.store(status.into(), Ordering::Release);
        });
        Ok(())
    }

    /// Conclude a global-order write, validating that the accumulated
    /// submits covered the whole subarray. A legal no-op for every other
    /// layout and for reads.
    pub fn finalize(&self) -> EngineResult<()> {
        self.guard_not_running()?;
        let mut state = self.shared.state.lock();
        if self.query_type == QueryType::Write && state.layout == Layout::GlobalOrder {
            exec::finalize_global_write(&self.array, &mut state)?;
        }
        Ok(())
    }

    /// Whether the last submit of a read query produced any results.
    /// Always false for write queries.
    pub fn has_results(&self) -> bool {
        self.query_type == QueryType::Read && self.shared.state.lock().delivered > 0
    }

    fn dimension(&self, dim_idx: u32) -> EngineResult<&DimensionData> {
        let dims = &self.array.schema().domain.dimensions;
        match dims.get(dim_idx as usize) {
            Some(d) => Ok(d),
            None => engine_bail!(
                "dimension index {} out of bounds ({} dimensions)",
                dim_idx,
                dims.len()
            ),
        }
    }

    fn range_at<'a>(
        state: &'a QueryState,
        dim_idx: u32,
        range_idx: u64,
    ) -> EngineResult<&'a RangeBytes> {
        let per_dim = match state.ranges.get(dim_idx as usize) {
            Some(r) => r,
            None => engine_bail!("dimension index {} out of bounds", dim_idx),
        };
        match per_dim.get(range_idx as usize) {
            Some(r) => Ok(r),
            None => engine_bail!(
                "range index {} out of bounds ({} ranges on dimension {})",
                range_idx,
                per_dim.len(),
                dim_idx
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;
    use std::sync::Arc;

    use tessera_dtype::{
        ArrayType, CellValNum, Datatype, FilterType, Layout, QueryStatus, QueryType,
    };

    use crate::array::Engine;
    use crate::query::QueryHandle;
    use crate::schema::{AttributeData, DimensionData, DomainData, SchemaData};

    fn sparse_2d(engine: &Engine, uri: &str) -> Arc<crate::array::ArrayStore> {
        let dim = |name: &str| DimensionData {
            name: name.to_string(),
            datatype: Datatype::Int32,
            cell_val_num: CellValNum::Fixed(NonZeroU32::MIN),
            domain: Some((1i32.to_ne_bytes().to_vec(), 4i32.to_ne_bytes().to_vec())),
            extent: None,
        };
        let schema = SchemaData {
            array_type: ArrayType::Sparse,
            cell_order: Layout::RowMajor,
            tile_order: Layout::RowMajor,
            domain: DomainData {
                dimensions: vec![dim("rows"), dim("cols")],
            },
            attributes: vec![AttributeData {
                name: "a".to_string(),
                datatype: Datatype::UInt32,
                cell_val_num: CellValNum::single(),
                filter: FilterType::None,
            }],
        };
        engine.create_array(uri, schema).unwrap();
        engine.open(uri).unwrap()
    }

    #[test]
    fn range_bookkeeping_round_trip() {
        let engine = Engine::new();
        let array = sparse_2d(&engine, "ranges");
        let query = QueryHandle::new(array, QueryType::Read);

        assert_eq!(query.range_num(0).unwrap(), 0);
        let (start, end) = (2i32, 3i32);
        unsafe {
            query
                .add_range(
                    0,
                    start.to_ne_bytes().as_ptr(),
                    end.to_ne_bytes().as_ptr(),
                )
                .unwrap();
        }
        assert_eq!(query.range_num(0).unwrap(), 1);
        assert_eq!(query.range_num(1).unwrap(), 0);

        let (s, e) = query.get_range(0, 0).unwrap();
        let s = unsafe { std::ptr::read_unaligned(s as *const i32) };
        let e = unsafe { std::ptr::read_unaligned(e as *const i32) };
        assert_eq!((s, e), (start, end));

        assert!(query.get_range(0, 1).is_err());
        assert!(query.range_num(7).is_err());
    }

    #[test]
    fn buffers_register_by_field_form() {
        let engine = Engine::new();
        let array = sparse_2d(&engine, "buffers");
        let query = QueryHandle::new(array, QueryType::Read);

        let mut data = [0u32; 4];
        let mut size = (data.len() * 4) as u64;
        unsafe {
            query
                .set_buffer("a", data.as_mut_ptr() as *mut u8, &mut size)
                .unwrap();
        }
        assert!(query.get_buffer("a").is_some());
        assert!(query.get_buffer("missing").is_none());
        assert!(query.get_buffer_var("a").is_none());

        // Fixed fields refuse the var registration form and vice versa.
        let mut offsets = [0u64; 4];
        let mut offsets_size = 32u64;
        let err = unsafe {
            query.set_buffer_var(
                "a",
                offsets.as_mut_ptr(),
                &mut offsets_size,
                data.as_mut_ptr() as *mut u8,
                &mut size,
            )
        };
        assert!(err.is_err());

        let err = unsafe { query.set_buffer("nope", data.as_mut_ptr() as *mut u8, &mut size) };
        assert!(err.is_err());
    }

    #[test]
    fn status_starts_uninitialized() {
        let engine = Engine::new();
        let array = sparse_2d(&engine, "status");
        let query = QueryHandle::new(array, QueryType::Write);
        assert_eq!(query.status(), QueryStatus::Uninitialized);
        assert_eq!(query.query_type(), QueryType::Write);
        assert!(!query.has_results());
    }
}
