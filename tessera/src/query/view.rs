//! Typed, zero-copy views over the engine's result buffers.
//!
//! Views are sized by the engine-reported byte counts of the last submit,
//! not by the bound capacity, and borrow the engine-reported address
//! directly. They borrow `&Query` while every mutating operation takes
//! `&mut Query`, so a view can never be held across the submit, finalize,
//! or free that would invalidate it.

use tessera_dtype::NativeValue;
use tessera_error::{tessera_bail, TesseraResult};

use crate::Query;

impl Query {
    /// A typed view over the engine's buffer for a fixed-size field,
    /// sized to the byte count the engine reported at the last submit.
    ///
    /// Fails with `NotFound` if the field was never bound, and with
    /// `TypeMismatch` if `T` disagrees with the field's datatype in the
    /// live schema.
    pub fn buffer<T: NativeValue>(&self, field: &str) -> TesseraResult<&[T]> {
        let datatype = self.field_datatype(field)?;
        datatype.byte_width()?;
        if T::KIND != datatype.value_kind() {
            tessera_bail!(TypeMismatch:
                "view is {}, field '{}' is {}", T::KIND, field, datatype);
        }
        let handle = self.handle()?;
        let (data, data_size) = match handle.get_buffer(field) {
            Some(raw) => raw,
            None => tessera_bail!(NotFound: "no buffer bound for field '{}'", field),
        };
        let len = unsafe { *data_size } as usize / size_of::<T>();
        // The registered address is pinned by this query and sized by the
        // engine-written byte count; the borrow of self keeps both alive
        // and blocks every operation that could invalidate them.
        Ok(unsafe { std::slice::from_raw_parts(data.cast_const().cast::<T>(), len) })
    }

    /// Offsets and data views over the engine's buffers for a
    /// variable-sized field. Each view is sized by its own reported byte
    /// count.
    pub fn buffer_var<T: NativeValue>(&self, field: &str) -> TesseraResult<(&[u64], &[T])> {
        let datatype = self.field_datatype(field)?;
        datatype.byte_width()?;
        if T::KIND != datatype.value_kind() {
            tessera_bail!(TypeMismatch:
                "view is {}, field '{}' is {}", T::KIND, field, datatype);
        }
        let handle = self.handle()?;
        let (offsets, offsets_size, data, data_size) = match handle.get_buffer_var(field) {
            Some(raw) => raw,
            None => tessera_bail!(NotFound: "no variable-sized buffer bound for field '{}'", field),
        };
        let offsets_len = unsafe { *offsets_size } as usize / 8;
        let data_len = unsafe { *data_size } as usize / size_of::<T>();
        Ok(unsafe {
            (
                std::slice::from_raw_parts(offsets.cast_const(), offsets_len),
                std::slice::from_raw_parts(data.cast_const().cast::<T>(), data_len),
            )
        })
    }

    /// The raw byte count the engine reported for a fixed-size field,
    /// without constructing a view. An absent buffer reports zero rather
    /// than an error.
    pub fn byte_size(&self, field: &str) -> TesseraResult<u64> {
        self.field_datatype(field)?;
        let handle = self.handle()?;
        Ok(match handle.get_buffer(field) {
            Some((_, data_size)) => unsafe { *data_size },
            None => 0,
        })
    }

    /// The raw offsets and data byte counts for a variable-sized field.
    /// Absent buffers report zero rather than an error.
    pub fn byte_size_var(&self, field: &str) -> TesseraResult<(u64, u64)> {
        self.field_datatype(field)?;
        let handle = self.handle()?;
        Ok(match handle.get_buffer_var(field) {
            Some((_, offsets_size, _, data_size)) => unsafe { (*offsets_size, *data_size) },
            None => (0, 0),
        })
    }
}

#[cfg(test)]
mod test {
    use tessera_dtype::{ArrayType, Datatype, QueryType};
    use tessera_error::TesseraError;

    use crate::{Array, ArraySchema, Attribute, Context, Dimension, Domain, Query};

    fn open_dense(ctx: &Context, uri: &str) -> Array {
        let mut domain = Domain::new(ctx);
        domain.add_dimension(Dimension::new(ctx, "x", Datatype::Int32, [1, 4], None).unwrap());
        let mut schema = ArraySchema::new(ctx, ArrayType::Dense);
        schema.set_domain(domain).unwrap();
        schema.add_attribute(Attribute::new(ctx, "a", Datatype::UInt32).unwrap());
        let mut array = Array::new(ctx, uri).unwrap();
        array.create(schema).unwrap();
        array.open(QueryType::Read).unwrap();
        array
    }

    #[test]
    fn views_require_a_bound_field_and_matching_kind() {
        let ctx = Context::new();
        let array = open_dense(&ctx, "views");
        let mut query = Query::new(&ctx, &array).unwrap();

        assert!(matches!(
            query.buffer::<u32>("a"),
            Err(TesseraError::NotFound(_))
        ));
        assert!(matches!(
            query.buffer::<u32>("nope"),
            Err(TesseraError::NotFound(_))
        ));

        query.set_buffer("a", vec![0u32; 4]).unwrap();
        assert!(matches!(
            query.buffer::<i32>("a"),
            Err(TesseraError::TypeMismatch(_))
        ));
        // Before any submit the view spans the bound capacity.
        assert_eq!(query.buffer::<u32>("a").unwrap().len(), 4);
    }

    #[test]
    fn absent_sizes_report_zero() {
        let ctx = Context::new();
        let array = open_dense(&ctx, "sizes");
        let query = Query::new(&ctx, &array).unwrap();
        assert_eq!(query.byte_size("a").unwrap(), 0);
        assert_eq!(query.byte_size_var("a").unwrap(), (0, 0));
        assert!(matches!(
            query.byte_size("nope"),
            Err(TesseraError::NotFound(_))
        ));
    }
}
