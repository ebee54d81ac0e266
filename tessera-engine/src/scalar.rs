//! Raw scalar interpretation for coordinate arithmetic.
//!
//! The engine receives coordinates, domain bounds, and range endpoints as
//! untyped byte sequences. This module interprets them through the
//! dimension's declared datatype. Only integer-kind scalars participate in
//! cell enumeration; float-kind dimensions are accepted in schemas but
//! refuse execution.

use num_traits::ToPrimitive;
use tessera_dtype::{match_each_value_kind, Datatype, ValueKind};

use crate::error::{engine_bail, engine_err, EngineResult};

/// Read one integer scalar of `datatype` from the front of `bytes`,
/// widened to `i128` (which covers every supported integer kind).
pub(crate) fn read_int(bytes: &[u8], datatype: Datatype) -> EngineResult<i128> {
    let kind = datatype.value_kind();
    if !kind.is_integer() {
        engine_bail!("dimension type {} is not supported for execution", datatype);
    }
    let width = kind.byte_width() as usize;
    if bytes.len() < width {
        engine_bail!(
            "scalar of type {} needs {} bytes, got {}",
            datatype,
            width,
            bytes.len()
        );
    }
    let value = match_each_value_kind!(kind, |$T| {
        // The source buffer is caller memory with no alignment guarantee.
        unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const $T) }
            .to_i128()
            .ok_or_else(|| engine_err!("scalar of type {} out of range", datatype))?
    });
    Ok(value)
}

/// Append one integer scalar of `datatype` to `out` in native byte order.
pub(crate) fn write_int(value: i128, datatype: Datatype, out: &mut Vec<u8>) -> EngineResult<()> {
    let kind = datatype.value_kind();
    if !kind.is_integer() {
        engine_bail!("dimension type {} is not supported for execution", datatype);
    }
    match kind {
        ValueKind::I8 => out.extend_from_slice(&(value as i8).to_ne_bytes()),
        ValueKind::I16 => out.extend_from_slice(&(value as i16).to_ne_bytes()),
        ValueKind::I32 => out.extend_from_slice(&(value as i32).to_ne_bytes()),
        ValueKind::I64 => out.extend_from_slice(&(value as i64).to_ne_bytes()),
        ValueKind::U8 => out.extend_from_slice(&(value as u8).to_ne_bytes()),
        ValueKind::U16 => out.extend_from_slice(&(value as u16).to_ne_bytes()),
        ValueKind::U32 => out.extend_from_slice(&(value as u32).to_ne_bytes()),
        ValueKind::U64 => out.extend_from_slice(&(value as u64).to_ne_bytes()),
        _ => engine_bail!("dimension type {} is not supported for execution", datatype),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use tessera_dtype::Datatype;

    use crate::scalar::{read_int, write_int};

    #[test]
    fn int_round_trip() {
        let mut buf = Vec::new();
        write_int(-7, Datatype::Int32, &mut buf).unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(read_int(&buf, Datatype::Int32).unwrap(), -7);

        let mut buf = Vec::new();
        write_int(u64::MAX as i128, Datatype::UInt64, &mut buf).unwrap();
        assert_eq!(read_int(&buf, Datatype::UInt64).unwrap(), u64::MAX as i128);
    }

    #[test]
    fn floats_refuse_interpretation() {
        assert!(read_int(&[0u8; 8], Datatype::Float64).is_err());
        assert!(write_int(0, Datatype::Float32, &mut Vec::new()).is_err());
    }
}
