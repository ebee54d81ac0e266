use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

use tessera_error::{tessera_bail, TesseraResult};

/// The raw sentinel the engine uses for variable-sized fields.
pub const VAR_NUM: u32 = u32::MAX;

/// Number of values stored per cell of a field: a fixed positive count, or
/// variable.
///
/// This, not the datatype alone, decides whether a field requires an
/// offsets buffer when bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellValNum {
    /// Every cell stores exactly this many values.
    Fixed(NonZeroU32),
    /// Cells store a variable number of values, addressed by an offsets
    /// buffer.
    Var,
}

impl CellValNum {
    /// One value per cell, the default for scalar fields.
    pub fn single() -> Self {
        Self::Fixed(NonZeroU32::MIN)
    }

    /// Whether this field is variable-sized.
    pub fn is_var(&self) -> bool {
        matches!(self, Self::Var)
    }

    /// The fixed per-cell value count, or 1 for variable-sized fields
    /// (each stored value is still one element wide).
    pub fn fixed_or_one(&self) -> u32 {
        match self {
            Self::Fixed(n) => n.get(),
            Self::Var => 1,
        }
    }

    /// Parse the engine's raw representation: [`VAR_NUM`] marks variable,
    /// any other positive count is fixed, zero is invalid.
    pub fn try_from_raw(raw: u32) -> TesseraResult<Self> {
        if raw == VAR_NUM {
            return Ok(Self::Var);
        }
        match NonZeroU32::new(raw) {
            Some(n) => Ok(Self::Fixed(n)),
            None => tessera_bail!(InvalidArgument: "cell val num must be positive"),
        }
    }

    /// The engine's raw representation of this value.
    pub fn to_raw(&self) -> u32 {
        match self {
            Self::Fixed(n) => n.get(),
            Self::Var => VAR_NUM,
        }
    }
}

impl Default for CellValNum {
    fn default() -> Self {
        Self::single()
    }
}

impl Display for CellValNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{}", n),
            Self::Var => write!(f, "var"),
        }
    }
}
