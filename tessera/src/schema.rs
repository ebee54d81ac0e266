use tessera_dtype::{ArrayType, CellValNum, Datatype, FilterType, Layout, NativeValue};
use tessera_engine::{AttributeData, DimensionData, DomainData, SchemaData};
use tessera_error::{tessera_bail, tessera_err, TesseraResult};

use crate::Context;

/// The raw bytes of one scalar, in native order, as the engine consumes
/// domain bounds and extents.
fn scalar_bytes<T: NativeValue>(value: T) -> Vec<u8> {
    let ptr = std::ptr::from_ref(&value).cast::<u8>();
    unsafe { std::slice::from_raw_parts(ptr, size_of::<T>()) }.to_vec()
}

/// One dimension of an array domain.
///
/// Doubles as the builder used before array creation and the read-only
/// accessor handed out by [`Domain`] lookups.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub(crate) data: DimensionData,
}

impl Dimension {
    /// Create a fixed-width dimension with inclusive `[low, high]` bounds
    /// and an optional space-tile extent, all in the dimension's datatype.
    pub fn new<T: NativeValue>(
        _ctx: &Context,
        name: &str,
        datatype: Datatype,
        domain: [T; 2],
        extent: Option<T>,
    ) -> TesseraResult<Self> {
        datatype.byte_width()?;
        if datatype.is_string() {
            tessera_bail!(UnsupportedOperation:
                "string dimensions are variable-sized; use Dimension::new_string");
        }
        if datatype.value_kind() != T::KIND {
            tessera_bail!(TypeMismatch:
                "domain bounds are {}, dimension '{}' is {}", T::KIND, name, datatype);
        }
        Ok(Self {
            data: DimensionData {
                name: name.to_string(),
                datatype,
                cell_val_num: CellValNum::single(),
                domain: Some((scalar_bytes(domain[0]), scalar_bytes(domain[1]))),
                extent: extent.map(scalar_bytes),
            },
        })
    }

    /// Create a variable-sized string dimension.
    pub fn new_string(_ctx: &Context, name: &str) -> Self {
        Self {
            data: DimensionData {
                name: name.to_string(),
                datatype: Datatype::StringAscii,
                cell_val_num: CellValNum::Var,
                domain: None,
                extent: None,
            },
        }
    }

    /// The dimension's name.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The dimension's coordinate datatype.
    pub fn datatype(&self) -> Datatype {
        self.data.datatype
    }

    /// Values per coordinate cell; `Var` for string dimensions.
    pub fn cell_val_num(&self) -> CellValNum {
        self.data.cell_val_num
    }
}

/// The ordered set of dimensions spanning an array, and the read-only
/// lookup surface over it.
#[derive(Debug, Clone, Default)]
pub struct Domain {
    pub(crate) data: DomainData,
}

impl Domain {
    /// Create an empty domain.
    pub fn new(_ctx: &Context) -> Self {
        Self::default()
    }

    pub(crate) fn from_data(data: DomainData) -> Self {
        Self { data }
    }

    /// Append a dimension. Order is significant: subarrays, coordinate
    /// tuples, and range indices all follow it.
    pub fn add_dimension(&mut self, dimension: Dimension) -> &mut Self {
        self.data.dimensions.push(dimension.data);
        self
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> u32 {
        self.data.ndim()
    }

    /// The shared datatype of a homogeneous domain. Heterogeneous domains
    /// have no single type, so coordinate tuples and subarrays are
    /// unavailable on them.
    pub fn datatype(&self) -> TesseraResult<Datatype> {
        self.data
            .datatype()
            .map_err(|e| tessera_err!(UnsupportedOperation: "{}", e))
    }

    /// Whether a dimension with this name exists.
    pub fn has_dimension(&self, name: &str) -> bool {
        self.data.dimension(name).is_some()
    }

    /// Look up a dimension by name.
    pub fn dimension_from_name(&self, name: &str) -> TesseraResult<Dimension> {
        match self.data.dimension(name) {
            Some(d) => Ok(Dimension { data: d.clone() }),
            None => tessera_bail!(NotFound: "no dimension named '{}'", name),
        }
    }

    /// Look up a dimension by index, in the order dimensions were added.
    pub fn dimension_from_index(&self, index: u32) -> TesseraResult<Dimension> {
        match self.data.dimensions.get(index as usize) {
            Some(d) => Ok(Dimension { data: d.clone() }),
            None => tessera_bail!(NotFound:
                "dimension index {} out of bounds ({} dimensions)", index, self.data.ndim()),
        }
    }
}

/// An attribute of an array schema.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub(crate) data: AttributeData,
}

impl Attribute {
    /// Create an attribute storing one value of `datatype` per cell.
    pub fn new(_ctx: &Context, name: &str, datatype: Datatype) -> TesseraResult<Self> {
        if datatype == Datatype::Any {
            tessera_bail!(UnsupportedType: "attribute '{}' may not use the generic datatype", name);
        }
        Ok(Self {
            data: AttributeData {
                name: name.to_string(),
                datatype,
                cell_val_num: CellValNum::single(),
                filter: FilterType::None,
            },
        })
    }

    /// Set the number of values stored per cell.
    pub fn set_cell_val_num(&mut self, cell_val_num: CellValNum) -> &mut Self {
        self.data.cell_val_num = cell_val_num;
        self
    }

    /// Mark the attribute variable-sized; bound buffers must then carry
    /// offsets.
    pub fn set_var_sized(&mut self) -> &mut Self {
        self.set_cell_val_num(CellValNum::Var)
    }

    /// Set the compression applied when the engine persists fragments.
    pub fn set_filter(&mut self, filter: FilterType) -> &mut Self {
        self.data.filter = filter;
        self
    }

    /// The attribute's name.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The attribute's datatype.
    pub fn datatype(&self) -> Datatype {
        self.data.datatype
    }

    /// Values per cell; `Var` requires an offsets buffer when bound.
    pub fn cell_val_num(&self) -> CellValNum {
        self.data.cell_val_num
    }
}

/// An array schema: dense or sparse, a domain, and a set of attributes.
///
/// Built up before array creation; afterwards obtained read-only from
/// [`crate::Array::schema`].
#[derive(Debug, Clone)]
pub struct ArraySchema {
    array_type: ArrayType,
    cell_order: Layout,
    tile_order: Layout,
    domain: Option<DomainData>,
    attributes: Vec<AttributeData>,
}

impl ArraySchema {
    /// Create an empty schema of the given array type.
    pub fn new(_ctx: &Context, array_type: ArrayType) -> Self {
        Self {
            array_type,
            cell_order: Layout::RowMajor,
            tile_order: Layout::RowMajor,
            domain: None,
            attributes: Vec::new(),
        }
    }

    pub(crate) fn from_data(data: SchemaData) -> Self {
        Self {
            array_type: data.array_type,
            cell_order: data.cell_order,
            tile_order: data.tile_order,
            domain: Some(data.domain),
            attributes: data.attributes,
        }
    }

    pub(crate) fn to_data(&self) -> TesseraResult<SchemaData> {
        match &self.domain {
            Some(domain) => Ok(SchemaData {
                array_type: self.array_type,
                cell_order: self.cell_order,
                tile_order: self.tile_order,
                domain: domain.clone(),
                attributes: self.attributes.clone(),
            }),
            None => tessera_bail!(InvalidArgument: "schema has no domain set"),
        }
    }

    /// Set the domain.
    pub fn set_domain(&mut self, domain: Domain) -> TesseraResult<()> {
        self.domain = Some(domain.data);
        Ok(())
    }

    /// Append an attribute.
    pub fn add_attribute(&mut self, attribute: Attribute) -> &mut Self {
        self.attributes.push(attribute.data);
        self
    }

    /// Set the cell order within a space tile.
    pub fn set_cell_order(&mut self, layout: Layout) -> TesseraResult<()> {
        if layout == Layout::Unordered {
            tessera_bail!(InvalidArgument: "unordered is not a storage order");
        }
        self.cell_order = layout;
        Ok(())
    }

    /// Set the space-tile order.
    pub fn set_tile_order(&mut self, layout: Layout) -> TesseraResult<()> {
        if layout == Layout::Unordered {
            tessera_bail!(InvalidArgument: "unordered is not a storage order");
        }
        self.tile_order = layout;
        Ok(())
    }

    /// Dense or sparse.
    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// The schema's domain.
    pub fn domain(&self) -> TesseraResult<Domain> {
        match &self.domain {
            Some(d) => Ok(Domain::from_data(d.clone())),
            None => tessera_bail!(SchemaUnavailable: "schema has no domain set"),
        }
    }

    /// Look up an attribute by name.
    pub fn attribute_from_name(&self, name: &str) -> TesseraResult<Attribute> {
        match self.attributes.iter().find(|a| a.name == name) {
            Some(a) => Ok(Attribute { data: a.clone() }),
            None => tessera_bail!(NotFound: "no attribute named '{}'", name),
        }
    }
}

#[cfg(test)]
mod test {
    use tessera_dtype::{ArrayType, CellValNum, Datatype};
    use tessera_error::TesseraError;

    use crate::{ArraySchema, Attribute, Context, Dimension, Domain};

    #[test]
    fn dimension_bounds_must_match_datatype() {
        let ctx = Context::new();
        let err = Dimension::new(&ctx, "d", Datatype::Int32, [1i64, 4], None);
        assert!(matches!(err, Err(TesseraError::TypeMismatch(_))));
        let err = Dimension::new(&ctx, "d", Datatype::Any, [1i64, 4], None);
        assert!(matches!(err, Err(TesseraError::UnsupportedType(_))));
        let err = Dimension::new(&ctx, "d", Datatype::StringAscii, [1u8, 4], None);
        assert!(matches!(err, Err(TesseraError::UnsupportedOperation(_))));

        let dim = Dimension::new(&ctx, "d", Datatype::Int32, [1, 4], Some(2)).unwrap();
        assert_eq!(dim.datatype(), Datatype::Int32);
        assert!(!dim.cell_val_num().is_var());
    }

    #[test]
    fn string_dimensions_are_variable() {
        let ctx = Context::new();
        let dim = Dimension::new_string(&ctx, "key");
        assert_eq!(dim.datatype(), Datatype::StringAscii);
        assert!(dim.cell_val_num().is_var());
    }

    #[test]
    fn domain_lookups() {
        let ctx = Context::new();
        let mut domain = Domain::new(&ctx);
        domain
            .add_dimension(Dimension::new(&ctx, "rows", Datatype::Int32, [1, 4], None).unwrap());
        domain
            .add_dimension(Dimension::new(&ctx, "cols", Datatype::Int32, [1, 4], None).unwrap());

        assert_eq!(domain.ndim(), 2);
        assert!(domain.has_dimension("rows"));
        assert!(!domain.has_dimension("depth"));
        assert_eq!(domain.dimension_from_index(1).unwrap().name(), "cols");
        assert!(matches!(
            domain.dimension_from_name("depth"),
            Err(TesseraError::NotFound(_))
        ));
        assert_eq!(domain.datatype().unwrap(), Datatype::Int32);
    }

    #[test]
    fn heterogeneous_domain_has_no_type() {
        let ctx = Context::new();
        let mut domain = Domain::new(&ctx);
        domain
            .add_dimension(Dimension::new(&ctx, "a", Datatype::Int32, [1, 4], None).unwrap());
        domain
            .add_dimension(Dimension::new(&ctx, "b", Datatype::Int64, [1i64, 4], None).unwrap());
        assert!(matches!(
            domain.datatype(),
            Err(TesseraError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn schema_accessors() {
        let ctx = Context::new();
        let mut schema = ArraySchema::new(&ctx, ArrayType::Sparse);
        assert!(schema.to_data().is_err());

        let mut domain = Domain::new(&ctx);
        domain.add_dimension(Dimension::new(&ctx, "d", Datatype::Int32, [1, 4], None).unwrap());
        schema.set_domain(domain).unwrap();

        let mut attr = Attribute::new(&ctx, "v", Datatype::Float64).unwrap();
        attr.set_var_sized();
        schema.add_attribute(attr);

        assert_eq!(schema.array_type(), ArrayType::Sparse);
        let attr = schema.attribute_from_name("v").unwrap();
        assert_eq!(attr.cell_val_num(), CellValNum::Var);
        assert!(matches!(
            schema.attribute_from_name("w"),
            Err(TesseraError::NotFound(_))
        ));
    }
}
