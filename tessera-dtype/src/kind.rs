use std::fmt::{Debug, Display, Formatter};

use num_traits::NumCast;

/// The generic value kinds a [`crate::Datatype`] can resolve to.
///
/// This is the vocabulary the buffer and range binders dispatch over: a
/// closed set of native representations, so that every dispatch site is a
/// compiler-checked exhaustive match rather than a runtime type-assertion
/// cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// No single native representation
    Any,
}

impl ValueKind {
    /// The byte width of one native value of this kind.
    ///
    /// [`ValueKind::Any`] has no native representation; callers must rule
    /// it out (via [`crate::Datatype::byte_width`]) before asking.
    pub fn byte_width(&self) -> u64 {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Any => tessera_error::tessera_panic!("the Any kind has no byte width"),
        }
    }

    /// Whether this kind is a signed or unsigned integer.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
        )
    }

    /// Whether this kind is a floating point kind.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Any => "any",
        };
        write!(f, "{}", name)
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A native Rust type corresponding to one of the non-`Any` value kinds.
///
/// The typed bind and range entry points are generic over this trait; the
/// erased, unsafe entry points are the only way to bypass it.
pub trait NativeValue:
    private::Sealed
    + Send
    + Sync
    + Copy
    + Debug
    + Default
    + PartialEq
    + PartialOrd
    + NumCast
    + 'static
{
    /// The value kind tag of this native type.
    const KIND: ValueKind;
}

macro_rules! native_value {
    ($T:ty, $kind:ident) => {
        impl NativeValue for $T {
            const KIND: ValueKind = ValueKind::$kind;
        }
    };
}

native_value!(i8, I8);
native_value!(i16, I16);
native_value!(i32, I32);
native_value!(i64, I64);
native_value!(u8, U8);
native_value!(u16, U16);
native_value!(u32, U32);
native_value!(u64, U64);
native_value!(f32, F32);
native_value!(f64, F64);

/// Dispatch a [`ValueKind`] to the corresponding native type, one arm per
/// kind.
///
/// The [`ValueKind::Any`] arm panics: callers are required to rule it out
/// first (a datatype with no byte width can never reach a native dispatch).
///
/// ```
/// use tessera_dtype::{match_each_value_kind, ValueKind};
/// let width = match_each_value_kind!(ValueKind::U32, |$T| {
///     std::mem::size_of::<$T>()
/// });
/// assert_eq!(width, 4);
/// ```
#[macro_export]
macro_rules! match_each_value_kind {
    ($self:expr, | $_:tt $T:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $T:ident ) => ( $($body)* )}
        match $self {
            $crate::ValueKind::I8 => __with__! { i8 },
            $crate::ValueKind::I16 => __with__! { i16 },
            $crate::ValueKind::I32 => __with__! { i32 },
            $crate::ValueKind::I64 => __with__! { i64 },
            $crate::ValueKind::U8 => __with__! { u8 },
            $crate::ValueKind::U16 => __with__! { u16 },
            $crate::ValueKind::U32 => __with__! { u32 },
            $crate::ValueKind::U64 => __with__! { u64 },
            $crate::ValueKind::F32 => __with__! { f32 },
            $crate::ValueKind::F64 => __with__! { f64 },
            $crate::ValueKind::Any => {
                tessera_error::tessera_panic!("the Any kind has no native representation")
            }
        }
    });
}

#[cfg(test)]
mod test {
    use crate::{NativeValue, ValueKind};

    #[test]
    fn kind_widths_match_native_sizes() {
        assert_eq!(ValueKind::I8.byte_width() as usize, size_of::<i8>());
        assert_eq!(ValueKind::U16.byte_width() as usize, size_of::<u16>());
        assert_eq!(ValueKind::F64.byte_width() as usize, size_of::<f64>());
    }

    #[test]
    fn dispatch_reaches_every_native_kind() {
        let kinds = [
            ValueKind::I8,
            ValueKind::I16,
            ValueKind::I32,
            ValueKind::I64,
            ValueKind::U8,
            ValueKind::U16,
            ValueKind::U32,
            ValueKind::U64,
            ValueKind::F32,
            ValueKind::F64,
        ];
        for kind in kinds {
            let width = match_each_value_kind!(kind, |$T| {
                assert_eq!(<$T as NativeValue>::KIND, kind);
                size_of::<$T>() as u64
            });
            assert_eq!(width, kind.byte_width());
        }
    }
}
