use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tessera_error::{tessera_bail, TesseraResult};

use crate::ValueKind;

/// The closed enumeration of cell datatypes supported by the engine.
///
/// Each variant maps to exactly one [`ValueKind`] and, except for
/// [`Datatype::Any`], to a fixed byte width. The datetime subtypes share
/// the representation of a 64-bit signed integer, not just its width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Datatype {
    /// 32-bit signed integer
    Int32 = 0,
    /// 64-bit signed integer
    Int64 = 1,
    /// 32-bit floating point value
    Float32 = 2,
    /// 64-bit floating point value
    Float64 = 3,
    /// Single character
    Char = 4,
    /// 8-bit signed integer
    Int8 = 5,
    /// 8-bit unsigned integer
    UInt8 = 6,
    /// 16-bit signed integer
    Int16 = 7,
    /// 16-bit unsigned integer
    UInt16 = 8,
    /// 32-bit unsigned integer
    UInt32 = 9,
    /// 64-bit unsigned integer
    UInt64 = 10,
    /// ASCII string
    StringAscii = 11,
    /// UTF-8 string
    StringUtf8 = 12,
    /// UTF-16 string
    StringUtf16 = 13,
    /// UTF-32 string
    StringUtf32 = 14,
    /// UCS2 string
    StringUcs2 = 15,
    /// UCS4 string
    StringUcs4 = 16,
    /// Any datatype; cells store (type tag, value) pairs and have no fixed
    /// width
    Any = 17,
    /// Datetime with year resolution
    DateTimeYear = 18,
    /// Datetime with month resolution
    DateTimeMonth = 19,
    /// Datetime with week resolution
    DateTimeWeek = 20,
    /// Datetime with day resolution
    DateTimeDay = 21,
    /// Datetime with hour resolution
    DateTimeHour = 22,
    /// Datetime with minute resolution
    DateTimeMinute = 23,
    /// Datetime with second resolution
    DateTimeSecond = 24,
    /// Datetime with millisecond resolution
    DateTimeMillisecond = 25,
    /// Datetime with microsecond resolution
    DateTimeMicrosecond = 26,
    /// Datetime with nanosecond resolution
    DateTimeNanosecond = 27,
    /// Datetime with picosecond resolution
    DateTimePicosecond = 28,
    /// Datetime with femtosecond resolution
    DateTimeFemtosecond = 29,
    /// Datetime with attosecond resolution
    DateTimeAttosecond = 30,
}

static_assertions::assert_eq_size!(Datatype, u8);

impl Datatype {
    /// The generic value kind of this datatype. Total over every variant:
    /// string types map to the unsigned integer kind of their code unit,
    /// datetimes to [`ValueKind::I64`].
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Self::Int8 => ValueKind::I8,
            Self::Int16 => ValueKind::I16,
            Self::Int32 => ValueKind::I32,
            Self::Int64 => ValueKind::I64,
            Self::UInt8 | Self::Char | Self::StringAscii | Self::StringUtf8 => ValueKind::U8,
            Self::UInt16 | Self::StringUtf16 | Self::StringUcs2 => ValueKind::U16,
            Self::UInt32 | Self::StringUtf32 | Self::StringUcs4 => ValueKind::U32,
            Self::UInt64 => ValueKind::U64,
            Self::Float32 => ValueKind::F32,
            Self::Float64 => ValueKind::F64,
            Self::Any => ValueKind::Any,
            Self::DateTimeYear
            | Self::DateTimeMonth
            | Self::DateTimeWeek
            | Self::DateTimeDay
            | Self::DateTimeHour
            | Self::DateTimeMinute
            | Self::DateTimeSecond
            | Self::DateTimeMillisecond
            | Self::DateTimeMicrosecond
            | Self::DateTimeNanosecond
            | Self::DateTimePicosecond
            | Self::DateTimeFemtosecond
            | Self::DateTimeAttosecond => ValueKind::I64,
        }
    }

    /// The fixed byte width of one element of this datatype.
    ///
    /// Fails with `UnsupportedType` for [`Datatype::Any`], which has no
    /// fixed width and must never be divided against.
    pub fn byte_width(&self) -> TesseraResult<u64> {
        match self.value_kind() {
            ValueKind::Any => {
                tessera_bail!(UnsupportedType: "datatype {} has no fixed byte width", self)
            }
            kind => Ok(kind.byte_width()),
        }
    }

    /// Whether this is one of the string datatypes.
    pub fn is_string(&self) -> bool {
        matches!(
            self,
            Self::StringAscii
                | Self::StringUtf8
                | Self::StringUtf16
                | Self::StringUtf32
                | Self::StringUcs2
                | Self::StringUcs4
        )
    }

    /// Whether this is one of the datetime datatypes.
    pub fn is_datetime(&self) -> bool {
        matches!(
            self,
            Self::DateTimeYear
                | Self::DateTimeMonth
                | Self::DateTimeWeek
                | Self::DateTimeDay
                | Self::DateTimeHour
                | Self::DateTimeMinute
                | Self::DateTimeSecond
                | Self::DateTimeMillisecond
                | Self::DateTimeMicrosecond
                | Self::DateTimeNanosecond
                | Self::DateTimePicosecond
                | Self::DateTimeFemtosecond
                | Self::DateTimeAttosecond
        )
    }

    /// Whether this datatype is a signed or unsigned integer (datetimes
    /// included).
    pub fn is_integer(&self) -> bool {
        self.value_kind().is_integer()
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Char => "char",
            Self::StringAscii => "string_ascii",
            Self::StringUtf8 => "string_utf8",
            Self::StringUtf16 => "string_utf16",
            Self::StringUtf32 => "string_utf32",
            Self::StringUcs2 => "string_ucs2",
            Self::StringUcs4 => "string_ucs4",
            Self::Any => "any",
            Self::DateTimeYear => "datetime_year",
            Self::DateTimeMonth => "datetime_month",
            Self::DateTimeWeek => "datetime_week",
            Self::DateTimeDay => "datetime_day",
            Self::DateTimeHour => "datetime_hour",
            Self::DateTimeMinute => "datetime_minute",
            Self::DateTimeSecond => "datetime_second",
            Self::DateTimeMillisecond => "datetime_ms",
            Self::DateTimeMicrosecond => "datetime_us",
            Self::DateTimeNanosecond => "datetime_ns",
            Self::DateTimePicosecond => "datetime_ps",
            Self::DateTimeFemtosecond => "datetime_fs",
            Self::DateTimeAttosecond => "datetime_as",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use tessera_error::TesseraError;

    use crate::{Datatype, ValueKind};

    #[rstest]
    #[case(Datatype::Int8, 1)]
    #[case(Datatype::Int16, 2)]
    #[case(Datatype::Int32, 4)]
    #[case(Datatype::Int64, 8)]
    #[case(Datatype::UInt8, 1)]
    #[case(Datatype::UInt16, 2)]
    #[case(Datatype::UInt32, 4)]
    #[case(Datatype::UInt64, 8)]
    #[case(Datatype::Float32, 4)]
    #[case(Datatype::Float64, 8)]
    #[case(Datatype::Char, 1)]
    #[case(Datatype::StringAscii, 1)]
    #[case(Datatype::StringUtf16, 2)]
    #[case(Datatype::StringUcs4, 4)]
    #[case(Datatype::DateTimeNanosecond, 8)]
    fn byte_widths(#[case] dt: Datatype, #[case] width: u64) {
        assert_eq!(dt.byte_width().unwrap(), width);
    }

    #[test]
    fn any_has_no_width() {
        assert!(matches!(
            Datatype::Any.byte_width(),
            Err(TesseraError::UnsupportedType(_))
        ));
    }

    #[test]
    fn datetime_shares_int64_kind() {
        assert_eq!(Datatype::DateTimeDay.value_kind(), ValueKind::I64);
        assert_eq!(
            Datatype::DateTimeAttosecond.value_kind(),
            Datatype::Int64.value_kind()
        );
    }

    #[test]
    fn round_trips_through_u8() {
        for raw in 0u8..=30 {
            let dt = Datatype::try_from(raw).unwrap();
            assert_eq!(u8::from(dt), raw);
        }
        assert!(Datatype::try_from(31u8).is_err());
    }
}
