use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::cells::CellTable;
use crate::error::{engine_bail, EngineResult};
use crate::schema::SchemaData;

/// The storage manager: a registry of arrays keyed by URI.
///
/// Arrays live for the lifetime of the engine instance. Multiple handles to
/// the same array may be open concurrently; the store serializes access to
/// cell data internally with a shared/exclusive lock.
#[derive(Debug, Default)]
pub struct Engine {
    arrays: RwLock<HashMap<String, Arc<ArrayStore>>>,
}

impl Engine {
    /// Create a new, empty engine.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an array under `uri` with the given schema.
    pub fn create_array(&self, uri: &str, schema: SchemaData) -> EngineResult<()> {
        schema.validate()?;
        let mut arrays = self.arrays.write();
        if arrays.contains_key(uri) {
            engine_bail!("array '{}' already exists", uri);
        }
        debug!("creating array '{}'", uri);
        arrays.insert(uri.to_string(), Arc::new(ArrayStore::new(uri, schema)));
        Ok(())
    }

    /// Open the array stored under `uri`.
    pub fn open(&self, uri: &str) -> EngineResult<Arc<ArrayStore>> {
        match self.arrays.read().get(uri) {
            Some(array) => Ok(Arc::clone(array)),
            None => engine_bail!("array '{}' does not exist", uri),
        }
    }

    /// Whether an array exists under `uri`.
    pub fn has_array(&self, uri: &str) -> bool {
        self.arrays.read().contains_key(uri)
    }

    /// Remove the array stored under `uri`. Open handles keep their data
    /// alive until dropped.
    pub fn delete_array(&self, uri: &str) -> EngineResult<()> {
        match self.arrays.write().remove(uri) {
            Some(_) => Ok(()),
            None => engine_bail!("array '{}' does not exist", uri),
        }
    }
}

/// One stored array: an immutable schema snapshot plus its cell data.
#[derive(Debug)]
pub struct ArrayStore {
    uri: String,
    schema: SchemaData,
    pub(crate) cells: RwLock<CellTable>,
}

impl ArrayStore {
    fn new(uri: &str, schema: SchemaData) -> Self {
        Self {
            uri: uri.to_string(),
            schema,
            cells: RwLock::new(CellTable::default()),
        }
    }

    /// The array's URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The immutable schema snapshot.
    pub fn schema(&self) -> &SchemaData {
        &self.schema
    }

    /// Number of materialized cells.
    pub fn cell_count(&self) -> usize {
        self.cells.read().len()
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;

    use tessera_dtype::{ArrayType, CellValNum, Datatype, FilterType, Layout};

    use crate::array::Engine;
    use crate::schema::{AttributeData, DimensionData, DomainData, SchemaData};

    fn simple_schema() -> SchemaData {
        SchemaData {
            array_type: ArrayType::Sparse,
            cell_order: Layout::RowMajor,
            tile_order: Layout::RowMajor,
            domain: DomainData {
                dimensions: vec![DimensionData {
                    name: "d".to_string(),
                    datatype: Datatype::Int64,
                    cell_val_num: CellValNum::Fixed(NonZeroU32::MIN),
                    domain: Some((0i64.to_ne_bytes().to_vec(), 9i64.to_ne_bytes().to_vec())),
                    extent: None,
                }],
            },
            attributes: vec![AttributeData {
                name: "a".to_string(),
                datatype: Datatype::Float64,
                cell_val_num: CellValNum::single(),
                filter: FilterType::Zstd,
            }],
        }
    }

    #[test]
    fn create_open_delete() {
        let engine = Engine::new();
        assert!(engine.open("x").is_err());
        engine.create_array("x", simple_schema()).unwrap();
        assert!(engine.has_array("x"));
        assert!(engine.create_array("x", simple_schema()).is_err());

        let array = engine.open("x").unwrap();
        assert_eq!(array.uri(), "x");
        assert_eq!(array.schema().attributes.len(), 1);
        assert_eq!(array.cell_count(), 0);

        engine.delete_array("x").unwrap();
        assert!(engine.delete_array("x").is_err());
        assert!(!engine.has_array("x"));
    }
}
