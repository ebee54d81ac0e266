use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Whether an array's domain is dense or sparse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ArrayType {
    /// Every cell in the domain exists.
    Dense = 0,
    /// Only explicitly written cells exist, addressed by coordinates.
    Sparse = 1,
}

/// The iteration order of cells for a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Layout {
    /// Row-major order over the subarray.
    RowMajor = 0,
    /// Column-major order over the subarray.
    ColMajor = 1,
    /// The engine's global cell order.
    GlobalOrder = 2,
    /// No prescribed order; required for sparse writes.
    Unordered = 3,
}

/// Read or write. Fixed at query creation and must match how the array was
/// opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum QueryType {
    /// Read query
    Read = 0,
    /// Write query
    Write = 1,
}

/// The status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum QueryStatus {
    /// Query failed.
    Failed = 0,
    /// Query completed; all requested data was produced.
    Completed = 1,
    /// Query is executing.
    InProgress = 2,
    /// Query terminated without satisfying all requested buffer capacity;
    /// the caller must drain or enlarge buffers and resubmit.
    Incomplete = 3,
    /// Query has not been submitted yet.
    Uninitialized = 4,
}

/// The compression vocabulary attributes can carry. Pure metadata for this
/// layer; the engine applies it when (and if) it persists fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FilterType {
    /// No compression.
    #[default]
    None = 0,
    /// Gzip.
    Gzip = 1,
    /// Zstandard.
    Zstd = 2,
    /// LZ4.
    Lz4 = 3,
    /// Run-length encoding.
    Rle = 4,
    /// Bzip2.
    Bzip2 = 5,
    /// Double-delta.
    DoubleDelta = 6,
}

impl Display for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RowMajor => "row-major",
            Self::ColMajor => "col-major",
            Self::GlobalOrder => "global-order",
            Self::Unordered => "unordered",
        };
        write!(f, "{}", name)
    }
}

impl Display for QueryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

impl Display for QueryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::InProgress => "in-progress",
            Self::Incomplete => "incomplete",
            Self::Uninitialized => "uninitialized",
        };
        write!(f, "{}", name)
    }
}
