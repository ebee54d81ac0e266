//! Range binding: restricting a query with per-dimension (start, end)
//! pairs, and reading registered ranges back.
//!
//! Ranges accumulate per dimension; registration order is preserved and is
//! the order lookups by index return. Strides are unsupported throughout.

use std::collections::HashMap;

use tessera_dtype::{match_each_value_kind, NativeValue};
use tessera_error::{tessera_bail, tessera_err, TesseraResult};

use crate::Query;

/// One endpoint of a registered range: a scalar of the dimension's kind,
/// or raw bytes for variable-sized dimensions. Datetime dimensions share
/// the 64-bit signed integer representation.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeValue {
    /// 8-bit signed endpoint
    Int8(i8),
    /// 16-bit signed endpoint
    Int16(i16),
    /// 32-bit signed endpoint
    Int32(i32),
    /// 64-bit signed endpoint
    Int64(i64),
    /// 8-bit unsigned endpoint
    UInt8(u8),
    /// 16-bit unsigned endpoint
    UInt16(u16),
    /// 32-bit unsigned endpoint
    UInt32(u32),
    /// 64-bit unsigned endpoint
    UInt64(u64),
    /// 32-bit float endpoint
    Float32(f32),
    /// 64-bit float endpoint
    Float64(f64),
    /// Raw bytes of a variable-sized endpoint
    Bytes(Vec<u8>),
}

macro_rules! range_value_from {
    ($T:ty, $variant:ident) => {
        impl From<$T> for RangeValue {
            fn from(value: $T) -> Self {
                Self::$variant(value)
            }
        }
    };
}

range_value_from!(i8, Int8);
range_value_from!(i16, Int16);
range_value_from!(i32, Int32);
range_value_from!(i64, Int64);
range_value_from!(u8, UInt8);
range_value_from!(u16, UInt16);
range_value_from!(u32, UInt32);
range_value_from!(u64, UInt64);
range_value_from!(f32, Float32);
range_value_from!(f64, Float64);

/// A registered (start, end) range over one dimension, as returned by
/// [`Query::ranges`].
#[derive(Debug, Clone, PartialEq)]
pub struct RangeLimits {
    /// Inclusive lower endpoint.
    pub start: RangeValue,
    /// Inclusive upper endpoint.
    pub end: RangeValue,
}

impl Query {
    /// Register a scalar range on the dimension at `dim_idx`. Start and
    /// end share one type, which must match the dimension's datatype kind.
    /// Variable-sized dimensions take [`Query::add_range_var`] instead.
    pub fn add_range<T: NativeValue>(&mut self, dim_idx: u32, start: T, end: T) -> TesseraResult<()> {
        let dim = self.dimension_data(dim_idx)?;
        if dim.cell_val_num.is_var() {
            tessera_bail!(UnsupportedOperation:
                "dimension '{}' is variable-sized; use add_range_var", dim.name);
        }
        dim.datatype.byte_width()?;
        if T::KIND != dim.datatype.value_kind() {
            tessera_bail!(TypeMismatch:
                "range is {}, dimension '{}' is {}", T::KIND, dim.name, dim.datatype);
        }
        let handle = self.handle()?;
        self.context.engine_result(unsafe {
            handle.add_range(
                dim_idx,
                std::ptr::from_ref(&start).cast(),
                std::ptr::from_ref(&end).cast(),
            )
        })
    }

    /// Register a byte range on a variable-sized dimension.
    ///
    /// Only string-typed dimensions support byte ranges; every other kind
    /// is rejected. This is a permanent restriction of the engine, not a
    /// transient failure.
    pub fn add_range_var(&mut self, dim_idx: u32, start: &[u8], end: &[u8]) -> TesseraResult<()> {
        let dim = self.dimension_data(dim_idx)?;
        if !dim.datatype.is_string() || !dim.cell_val_num.is_var() {
            tessera_bail!(UnsupportedOperation:
                "byte ranges apply only to string dimensions; '{}' is {}", dim.name, dim.datatype);
        }
        let handle = self.handle()?;
        self.context.engine_result(unsafe {
            handle.add_range_var(
                dim_idx,
                start.as_ptr(),
                start.len() as u64,
                end.as_ptr(),
                end.len() as u64,
            )
        })
    }

    /// Read back the range at `range_idx` on the dimension at `dim_idx`.
    ///
    /// Variable-sized dimensions report byte endpoints, allocated to the
    /// exact lengths the engine reports; fixed dimensions report a scalar
    /// pair typed per the dimension's datatype.
    pub fn get_range(&self, dim_idx: u32, range_idx: u64) -> TesseraResult<(RangeValue, RangeValue)> {
        let dim = self.dimension_data(dim_idx)?;
        let handle = self.handle()?;
        if dim.cell_val_num.is_var() {
            let (start_len, end_len) = self
                .context
                .engine_result(handle.get_range_var_size(dim_idx, range_idx))?;
            let mut start = vec![0u8; start_len as usize];
            let mut end = vec![0u8; end_len as usize];
            self.context.engine_result(unsafe {
                handle.get_range_var(dim_idx, range_idx, start.as_mut_ptr(), end.as_mut_ptr())
            })?;
            return Ok((RangeValue::Bytes(start), RangeValue::Bytes(end)));
        }

        dim.datatype.byte_width()?;
        let kind = dim.datatype.value_kind();
        let (start, end) = self.context.engine_result(handle.get_range(dim_idx, range_idx))?;
        Ok(match_each_value_kind!(kind, |$T| {
            // Endpoints live in engine-owned storage with no alignment
            // guarantee; copy them out immediately.
            let start = unsafe { std::ptr::read_unaligned(start.cast::<$T>()) };
            let end = unsafe { std::ptr::read_unaligned(end.cast::<$T>()) };
            (RangeValue::from(start), RangeValue::from(end))
        }))
    }

    /// Alias of [`Query::get_range`], kept for interface continuity:
    /// range lookup handles variable-sized dimensions transparently.
    pub fn get_range_var(
        &self,
        dim_idx: u32,
        range_idx: u64,
    ) -> TesseraResult<(RangeValue, RangeValue)> {
        self.get_range(dim_idx, range_idx)
    }

    /// Number of ranges registered on the dimension at `dim_idx`.
    pub fn range_num(&self, dim_idx: u32) -> TesseraResult<u64> {
        self.dimension_data(dim_idx)?;
        let handle = self.handle()?;
        self.context.engine_result(handle.range_num(dim_idx))
    }

    /// Every registered range, keyed by dimension name, in registration
    /// order. Introspection only; execution reads the engine's own range
    /// state.
    pub fn ranges(&self) -> TesseraResult<HashMap<String, Vec<RangeLimits>>> {
        let ndim = self.store.schema().domain.ndim();
        let mut map = HashMap::with_capacity(ndim as usize);
        for d in 0..ndim {
            let name = self.dimension_data(d)?.name.clone();
            let count = self.range_num(d)?;
            let mut limits = Vec::with_capacity(count as usize);
            for i in 0..count {
                let (start, end) = self.get_range(d, i)?;
                limits.push(RangeLimits { start, end });
            }
            map.insert(name, limits);
        }
        Ok(map)
    }

    /// Restrict the query to an inclusive bounding box, two scalars per
    /// dimension in dimension order, replacing any registered ranges.
    ///
    /// The element kind must match the domain's datatype. For writes this
    /// is meaningful only on dense arrays.
    pub fn set_subarray<T: NativeValue>(&mut self, subarray: &[T]) -> TesseraResult<()> {
        let schema = self.store.schema();
        let domain_type = schema
            .domain
            .datatype()
            .map_err(|e| tessera_err!(UnsupportedOperation: "{}", e))?;
        domain_type.byte_width()?;
        if T::KIND != domain_type.value_kind() {
            tessera_bail!(TypeMismatch:
                "subarray is {}, domain is {}", T::KIND, domain_type);
        }
        let ndim = schema.domain.ndim() as usize;
        if subarray.len() != 2 * ndim {
            tessera_bail!(InvalidArgument:
                "subarray needs {} values (2 per dimension), got {}", 2 * ndim, subarray.len());
        }
        let handle = self.handle()?;
        self.context
            .engine_result(unsafe { handle.set_subarray(subarray.as_ptr().cast()) })
    }
}
