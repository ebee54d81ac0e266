//! Buffer binding: marshaling typed, caller-supplied storage into the
//! engine's untyped registration protocol.
//!
//! Every bind pins the supplied storage in the query's buffer table so the
//! raw address registered with the engine stays valid until the query is
//! finalized, freed, or the field is rebound. The pin is a memory-safety
//! invariant, not an optimization: the engine reads and writes through the
//! registered address on every submit.

use std::any::Any;
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ffi::c_void;

use log::trace;
use tessera_dtype::{NativeValue, COORDS};
use tessera_error::{tessera_bail, TesseraResult};

use crate::Query;

/// The byte-size cell shared with the engine: the engine snapshots the
/// capacity it holds at registration and writes bytes-used back through it
/// at every submit.
#[derive(Debug)]
pub(crate) struct SizeCell(UnsafeCell<u64>);

// The engine writes through the cell only while a submit executes; the
// query serializes submits against reads of the cell.
unsafe impl Send for SizeCell {}
unsafe impl Sync for SizeCell {}

impl SizeCell {
    fn boxed(value: u64) -> Box<Self> {
        Box::new(Self(UnsafeCell::new(value)))
    }

    fn as_mut_ptr(&self) -> *mut u64 {
        self.0.get()
    }

    pub(crate) fn get(&self) -> u64 {
        unsafe { *self.0.get() }
    }

    fn set(&self, value: u64) {
        unsafe { *self.0.get() = value }
    }
}

/// One bound field: the size cells registered with the engine plus the
/// pinned storage backing the registered addresses. Unsafe binds pin
/// nothing; their caller owns the storage obligation.
pub(crate) struct BufferEntry {
    data_size: Box<SizeCell>,
    offsets_size: Option<Box<SizeCell>>,
    pins: Vec<Box<dyn Any + Send>>,
}

impl std::fmt::Debug for BufferEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferEntry")
            .field("data_bytes", &self.data_bytes())
            .field("offset_bytes", &self.offset_bytes())
            .field("pins", &self.pins.len())
            .finish()
    }
}

impl BufferEntry {
    /// Bytes the engine reported into the data buffer at the last submit
    /// (the capacity, before any submit).
    pub(crate) fn data_bytes(&self) -> u64 {
        self.data_size.get()
    }

    /// Bytes reported into the offsets buffer; zero for fixed-size fields.
    pub(crate) fn offset_bytes(&self) -> u64 {
        self.offsets_size.as_ref().map(|c| c.get()).unwrap_or(0)
    }

    /// Drop the pins and make the recorded sizes authoritative-zero, as
    /// finalize requires.
    pub(crate) fn invalidate(&mut self) {
        self.pins.clear();
        self.data_size.set(0);
        if let Some(off) = &self.offsets_size {
            off.set(0);
        }
    }
}

impl Query {
    /// Bind a caller-supplied buffer to a fixed-size attribute or
    /// dimension (or the coordinate sentinel).
    ///
    /// The element kind of `T` must match the field's declared datatype;
    /// the buffer must be pre-sized and non-empty. The storage is pinned
    /// by the query and its address registered with the engine; rebinding
    /// the same field releases the previous pin.
    pub fn set_buffer<T: NativeValue>(&mut self, field: &str, mut data: Vec<T>) -> TesseraResult<()> {
        let datatype = self.field_datatype(field)?;
        let width = datatype.byte_width()?;
        if data.is_empty() {
            tessera_bail!(EmptyBuffer:
                "buffer for '{}' must be pre-sized before reading or writing", field);
        }
        if T::KIND != datatype.value_kind() {
            tessera_bail!(TypeMismatch:
                "buffer is {}, field '{}' is {}", T::KIND, field, datatype);
        }
        let byte_len = data.len() as u64 * width;
        let data_size = SizeCell::boxed(byte_len);
        let ptr = data.as_mut_ptr().cast::<u8>();
        let handle = self.handle()?;
        self.context
            .engine_result(unsafe { handle.set_buffer(field, ptr, data_size.as_mut_ptr()) })?;
        trace!("bound {} bytes to '{}'", byte_len, field);
        self.buffers.insert(
            field.to_string(),
            BufferEntry {
                data_size,
                offsets_size: None,
                pins: vec![Box::new(data)],
            },
        );
        Ok(())
    }

    /// Bind an offsets/data buffer pair to a variable-sized attribute or
    /// dimension. Offsets are byte positions into the data buffer, eight
    /// bytes each. The coordinate sentinel is never variable-sized.
    pub fn set_buffer_var<T: NativeValue>(
        &mut self,
        field: &str,
        mut offsets: Vec<u64>,
        mut data: Vec<T>,
    ) -> TesseraResult<()> {
        if field == COORDS {
            tessera_bail!(UnsupportedOperation:
                "the coordinate field is fixed-size; bind it with set_buffer");
        }
        let datatype = self.field_datatype(field)?;
        let width = datatype.byte_width()?;
        if data.is_empty() {
            tessera_bail!(EmptyBuffer:
                "buffer for '{}' must be pre-sized before reading or writing", field);
        }
        if offsets.is_empty() {
            tessera_bail!(EmptyBuffer:
                "offsets for '{}' must be pre-sized before reading or writing", field);
        }
        if T::KIND != datatype.value_kind() {
            tessera_bail!(TypeMismatch:
                "buffer is {}, field '{}' is {}", T::KIND, field, datatype);
        }
        let byte_len = data.len() as u64 * width;
        let offsets_len = offsets.len() as u64 * 8;
        let data_size = SizeCell::boxed(byte_len);
        let offsets_size = SizeCell::boxed(offsets_len);
        let data_ptr = data.as_mut_ptr().cast::<u8>();
        let offsets_ptr = offsets.as_mut_ptr();
        let handle = self.handle()?;
        self.context.engine_result(unsafe {
            handle.set_buffer_var(
                field,
                offsets_ptr,
                offsets_size.as_mut_ptr(),
                data_ptr,
                data_size.as_mut_ptr(),
            )
        })?;
        trace!(
            "bound {} offset bytes and {} data bytes to '{}'",
            offsets_len,
            byte_len,
            field
        );
        self.buffers.insert(
            field.to_string(),
            BufferEntry {
                data_size,
                offsets_size: Some(offsets_size),
                pins: vec![Box::new(offsets), Box::new(data)],
            },
        );
        Ok(())
    }

    /// Bind a raw address to a fixed-size field, skipping type validation.
    ///
    /// # Safety
    ///
    /// The caller assumes everything the typed path enforces: the memory
    /// must hold elements of the field's datatype, must span `byte_len`
    /// bytes, and must stay valid and unaliased until the query is
    /// finalized, freed, or the field is rebound.
    pub unsafe fn set_buffer_unsafe(
        &mut self,
        field: &str,
        data: *mut c_void,
        byte_len: u64,
    ) -> TesseraResult<()> {
        let data_size = SizeCell::boxed(byte_len);
        let handle = self.handle()?;
        self.context.engine_result(unsafe {
            handle.set_buffer(field, data.cast::<u8>(), data_size.as_mut_ptr())
        })?;
        self.buffers.insert(
            field.to_string(),
            BufferEntry {
                data_size,
                offsets_size: None,
                pins: Vec::new(),
            },
        );
        Ok(())
    }

    /// Bind raw offsets and data addresses to a variable-sized field,
    /// skipping type validation.
    ///
    /// # Safety
    ///
    /// As [`Query::set_buffer_unsafe`], for both regions.
    pub unsafe fn set_buffer_var_unsafe(
        &mut self,
        field: &str,
        offsets: *mut u64,
        offsets_byte_len: u64,
        data: *mut c_void,
        byte_len: u64,
    ) -> TesseraResult<()> {
        let data_size = SizeCell::boxed(byte_len);
        let offsets_size = SizeCell::boxed(offsets_byte_len);
        let handle = self.handle()?;
        self.context.engine_result(unsafe {
            handle.set_buffer_var(
                field,
                offsets,
                offsets_size.as_mut_ptr(),
                data.cast::<u8>(),
                data_size.as_mut_ptr(),
            )
        })?;
        self.buffers.insert(
            field.to_string(),
            BufferEntry {
                data_size,
                offsets_size: Some(offsets_size),
                pins: Vec::new(),
            },
        );
        Ok(())
    }

    /// Bind the coordinate buffer of a sparse query; shorthand for binding
    /// the coordinate sentinel.
    pub fn set_coordinates<T: NativeValue>(&mut self, coordinates: Vec<T>) -> TesseraResult<()> {
        self.set_buffer(COORDS, coordinates)
    }

    /// Per bound field, the number of offset elements and data elements
    /// the engine reported at the last submit.
    ///
    /// Byte counts divide by the field's element width: the domain's
    /// width for the coordinate sentinel, eight bytes for offsets. Fixed
    /// fields always report zero offset elements. Field types are resolved
    /// from the live schema on every call.
    pub fn result_buffer_elements(&self) -> TesseraResult<HashMap<String, [u64; 2]>> {
        let mut elements = HashMap::with_capacity(self.buffers.len());
        for (name, entry) in &self.buffers {
            let datatype = self.field_datatype(name)?;
            let width = datatype.byte_width()?;
            let offset_elements = entry.offset_bytes() / 8;
            let data_elements = entry.data_bytes() / width;
            elements.insert(name.clone(), [offset_elements, data_elements]);
        }
        Ok(elements)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use tessera_dtype::{ArrayType, Datatype, QueryType};
    use tessera_error::TesseraError;

    use crate::{Array, ArraySchema, Attribute, Context, Dimension, Domain, Query};

    fn array_with_attr(ctx: &Context, uri: &str, datatype: Datatype) -> Array {
        let mut domain = Domain::new(ctx);
        domain.add_dimension(
            Dimension::new(ctx, "x", Datatype::Int64, [1i64, 100], None).unwrap(),
        );
        let mut schema = ArraySchema::new(ctx, ArrayType::Sparse);
        schema.set_domain(domain).unwrap();
        schema.add_attribute(Attribute::new(ctx, "a", datatype).unwrap());
        let mut var_attr = Attribute::new(ctx, "tags", Datatype::StringUtf8).unwrap();
        var_attr.set_var_sized();
        schema.add_attribute(var_attr);
        let mut array = Array::new(ctx, uri).unwrap();
        array.create(schema).unwrap();
        array.open(QueryType::Read).unwrap();
        array
    }

    #[test]
    fn empty_buffers_are_rejected() {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "empty", Datatype::Int32);
        let mut query = Query::new(&ctx, &array).unwrap();

        assert!(matches!(
            query.set_buffer::<i32>("a", Vec::new()),
            Err(TesseraError::EmptyBuffer(_))
        ));
        assert!(matches!(
            query.set_buffer_var::<u8>("tags", vec![0], Vec::new()),
            Err(TesseraError::EmptyBuffer(_))
        ));
        assert!(matches!(
            query.set_buffer_var::<u8>("tags", Vec::new(), vec![0]),
            Err(TesseraError::EmptyBuffer(_))
        ));
    }

    #[rstest]
    #[case(Datatype::Int32)]
    #[case(Datatype::UInt16)]
    #[case(Datatype::Float64)]
    fn mismatched_kinds_are_rejected(#[case] datatype: Datatype) {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "mismatch", datatype);
        let mut query = Query::new(&ctx, &array).unwrap();

        // i8 matches none of the attribute datatypes above.
        assert!(matches!(
            query.set_buffer("a", vec![0i8; 4]),
            Err(TesseraError::TypeMismatch(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "unknown", Datatype::Int32);
        let mut query = Query::new(&ctx, &array).unwrap();
        assert!(matches!(
            query.set_buffer("missing", vec![0i32; 4]),
            Err(TesseraError::NotFound(_))
        ));
    }

    #[test]
    fn byte_length_is_elements_times_width() {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "width", Datatype::UInt16);
        let mut query = Query::new(&ctx, &array).unwrap();

        for n in [1usize, 3, 17] {
            query.set_buffer("a", vec![0u16; n]).unwrap();
            assert_eq!(query.byte_size("a").unwrap(), n as u64 * 2);
        }
    }

    #[test]
    fn dimension_buffers_resolve_before_attributes() {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "resolution", Datatype::Int32);
        let mut query = Query::new(&ctx, &array).unwrap();

        // "x" is a dimension of type Int64; an i64 buffer binds, an i32
        // buffer does not.
        assert!(query.set_buffer("x", vec![0i64; 4]).is_ok());
        assert!(matches!(
            query.set_buffer("x", vec![0i32; 4]),
            Err(TesseraError::TypeMismatch(_))
        ));
    }

    #[test]
    fn coordinates_never_bind_variable() {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "coords-var", Datatype::Int32);
        let mut query = Query::new(&ctx, &array).unwrap();
        assert!(matches!(
            query.set_buffer_var::<i64>(tessera_dtype::COORDS, vec![0], vec![0i64]),
            Err(TesseraError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn unsafe_bind_skips_validation() {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "unsafe", Datatype::Int32);
        let mut query = Query::new(&ctx, &array).unwrap();

        // A u8 region for an i32 attribute: the typed path would reject
        // this, the unsafe path must not.
        let mut raw = [0u8; 16];
        unsafe {
            query
                .set_buffer_unsafe("a", raw.as_mut_ptr().cast(), raw.len() as u64)
                .unwrap();
        }
        assert_eq!(query.byte_size("a").unwrap(), 16);

        // Unknown fields still fail at the engine.
        let err = unsafe { query.set_buffer_unsafe("missing", raw.as_mut_ptr().cast(), 16) };
        assert!(matches!(err, Err(TesseraError::EngineFailure(_))));
    }

    #[test]
    fn result_elements_report_zero_offsets_for_fixed_fields() {
        let ctx = Context::new();
        let array = array_with_attr(&ctx, "elements", Datatype::Int32);
        let mut query = Query::new(&ctx, &array).unwrap();

        query.set_buffer("a", vec![0i32; 6]).unwrap();
        query
            .set_buffer_var("tags", vec![0u64; 3], vec![0u8; 12])
            .unwrap();

        let elements = query.result_buffer_elements().unwrap();
        assert_eq!(elements["a"], [0, 6]);
        assert_eq!(elements["tags"], [3, 12]);
    }
}
