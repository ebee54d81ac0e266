use tessera_dtype::{ArrayType, CellValNum, Datatype, FilterType, Layout};

use crate::error::{engine_bail, EngineResult};
use crate::scalar;

/// A dimension of an array domain.
///
/// Fixed-width dimensions carry raw domain bounds (one scalar each, in the
/// dimension's datatype); string dimensions are variable-sized and carry no
/// bounds.
#[derive(Debug, Clone)]
pub struct DimensionData {
    /// Dimension name, unique within the domain.
    pub name: String,
    /// Coordinate datatype.
    pub datatype: Datatype,
    /// Fixed or variable coordinates; string dimensions are variable.
    pub cell_val_num: CellValNum,
    /// Raw inclusive `(low, high)` bounds; absent for string dimensions.
    pub domain: Option<(Vec<u8>, Vec<u8>)>,
    /// Raw space-tile extent; informational for the in-memory store.
    pub extent: Option<Vec<u8>>,
}

impl DimensionData {
    /// The inclusive integer bounds of this dimension, widened to `i128`.
    pub(crate) fn int_bounds(&self) -> EngineResult<(i128, i128)> {
        match &self.domain {
            Some((lo, hi)) => Ok((
                scalar::read_int(lo, self.datatype)?,
                scalar::read_int(hi, self.datatype)?,
            )),
            None => engine_bail!("dimension '{}' has no fixed domain bounds", self.name),
        }
    }
}

/// An attribute of an array schema.
#[derive(Debug, Clone)]
pub struct AttributeData {
    /// Attribute name, unique within the schema.
    pub name: String,
    /// Cell value datatype.
    pub datatype: Datatype,
    /// Values per cell; `Var` requires an offsets buffer when bound.
    pub cell_val_num: CellValNum,
    /// Compression applied when the engine persists fragments.
    pub filter: FilterType,
}

/// The ordered set of dimensions spanning an array.
#[derive(Debug, Clone, Default)]
pub struct DomainData {
    /// Dimensions in the order they were added.
    pub dimensions: Vec<DimensionData>,
}

impl DomainData {
    /// Number of dimensions.
    pub fn ndim(&self) -> u32 {
        self.dimensions.len() as u32
    }

    /// Look up a dimension by name.
    pub fn dimension(&self, name: &str) -> Option<&DimensionData> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// The shared datatype of a homogeneous domain. Heterogeneous domains
    /// have no single type; coordinate-tuple operations are unavailable on
    /// them.
    pub fn datatype(&self) -> EngineResult<Datatype> {
        let mut dims = self.dimensions.iter();
        let first = match dims.next() {
            Some(d) => d.datatype,
            None => engine_bail!("domain has no dimensions"),
        };
        if dims.any(|d| d.datatype != first) {
            engine_bail!("domain is not homogeneous; no single domain type exists");
        }
        Ok(first)
    }
}

/// The immutable schema snapshot of an array.
#[derive(Debug, Clone)]
pub struct SchemaData {
    /// Dense or sparse.
    pub array_type: ArrayType,
    /// Cell order within a space tile.
    pub cell_order: Layout,
    /// Space-tile order.
    pub tile_order: Layout,
    /// The array's domain.
    pub domain: DomainData,
    /// Attributes in the order they were added.
    pub attributes: Vec<AttributeData>,
}

impl SchemaData {
    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeData> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Validate the schema at array creation time.
    pub(crate) fn validate(&self) -> EngineResult<()> {
        if self.domain.dimensions.is_empty() {
            engine_bail!("schema requires at least one dimension");
        }
        if self.attributes.is_empty() {
            engine_bail!("schema requires at least one attribute");
        }
        let mut names: Vec<&str> = self
            .domain
            .dimensions
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.attributes.iter().map(|a| a.name.as_str()))
            .collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            engine_bail!("dimension and attribute names must be unique");
        }
        for dim in &self.domain.dimensions {
            match dim.cell_val_num {
                CellValNum::Var => {
                    if !dim.datatype.is_string() {
                        engine_bail!(
                            "variable-sized dimension '{}' must be string-typed",
                            dim.name
                        );
                    }
                }
                CellValNum::Fixed(n) => {
                    if n.get() != 1 {
                        engine_bail!("dimension '{}' must store one coordinate per cell", dim.name);
                    }
                    if dim.domain.is_none() {
                        engine_bail!("dimension '{}' requires domain bounds", dim.name);
                    }
                }
            }
            if self.array_type == ArrayType::Dense && !dim.datatype.is_integer() {
                engine_bail!(
                    "dense array dimension '{}' must be integer-typed, got {}",
                    dim.name,
                    dim.datatype
                );
            }
        }
        for attr in &self.attributes {
            if attr.datatype == Datatype::Any {
                engine_bail!("attribute '{}' may not use the generic datatype", attr.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;

    use tessera_dtype::{ArrayType, CellValNum, Datatype, FilterType, Layout};

    use crate::schema::{AttributeData, DimensionData, DomainData, SchemaData};

    pub(crate) fn int_dim(name: &str, lo: i32, hi: i32) -> DimensionData {
        DimensionData {
            name: name.to_string(),
            datatype: Datatype::Int32,
            cell_val_num: CellValNum::single(),
            domain: Some((lo.to_ne_bytes().to_vec(), hi.to_ne_bytes().to_vec())),
            extent: None,
        }
    }

    fn schema(dims: Vec<DimensionData>) -> SchemaData {
        SchemaData {
            array_type: ArrayType::Dense,
            cell_order: Layout::RowMajor,
            tile_order: Layout::RowMajor,
            domain: DomainData { dimensions: dims },
            attributes: vec![AttributeData {
                name: "a".to_string(),
                datatype: Datatype::Int32,
                cell_val_num: CellValNum::single(),
                filter: FilterType::None,
            }],
        }
    }

    #[test]
    fn validates_unique_names() {
        let s = schema(vec![int_dim("a", 1, 4)]);
        assert!(s.validate().is_err());
        let s = schema(vec![int_dim("rows", 1, 4)]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn domain_type_requires_homogeneity() {
        let mut hetero = schema(vec![int_dim("rows", 1, 4), int_dim("cols", 1, 4)]);
        assert_eq!(hetero.domain.datatype().unwrap(), Datatype::Int32);
        hetero.domain.dimensions[1].datatype = Datatype::Int64;
        assert!(hetero.domain.datatype().is_err());
    }

    #[test]
    fn dense_rejects_string_dimensions() {
        let mut s = schema(vec![DimensionData {
            name: "k".to_string(),
            datatype: Datatype::StringAscii,
            cell_val_num: CellValNum::Var,
            domain: None,
            extent: None,
        }]);
        assert!(s.validate().is_err());
        s.array_type = ArrayType::Sparse;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn fixed_dim_needs_bounds() {
        let mut s = schema(vec![int_dim("rows", 1, 4)]);
        s.domain.dimensions[0].domain = None;
        assert!(s.validate().is_err());
        let _ = NonZeroU32::new(2).map(|n| {
            let mut s = schema(vec![int_dim("rows", 1, 4)]);
            s.domain.dimensions[0].cell_val_num = CellValNum::Fixed(n);
            assert!(s.validate().is_err());
        });
    }
}
