use std::sync::Arc;

use tessera_dtype::QueryType;
use tessera_engine::ArrayStore;
use tessera_error::{tessera_bail, TesseraResult};

use crate::{ArraySchema, Context};

/// A handle to one named array.
///
/// Created against a URI, materialized with [`Array::create`], and opened
/// for exactly one query type at a time. Queries are created against an
/// open array and inherit its query type.
#[derive(Debug)]
pub struct Array {
    context: Context,
    uri: String,
    store: Option<Arc<ArrayStore>>,
    query_type: Option<QueryType>,
}

impl Array {
    /// Create a handle for the array stored under `uri`. The array itself
    /// need not exist yet.
    pub fn new(ctx: &Context, uri: &str) -> TesseraResult<Self> {
        Ok(Self {
            context: ctx.clone(),
            uri: uri.to_string(),
            store: None,
            query_type: None,
        })
    }

    /// The array's URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Materialize the array under this handle's URI with the given
    /// schema.
    pub fn create(&self, schema: ArraySchema) -> TesseraResult<()> {
        let data = schema.to_data()?;
        self.context
            .engine_result(self.context.engine().create_array(&self.uri, data))
    }

    /// Open the array for reading or writing. The query type constrains
    /// every query created against this handle.
    pub fn open(&mut self, query_type: QueryType) -> TesseraResult<()> {
        if self.store.is_some() {
            tessera_bail!(InvalidArgument: "array '{}' is already open", self.uri);
        }
        let store = self
            .context
            .engine_result(self.context.engine().open(&self.uri))?;
        self.store = Some(store);
        self.query_type = Some(query_type);
        Ok(())
    }

    /// Close the array. Queries created while it was open keep their own
    /// handle. Closing a closed array is a no-op.
    pub fn close(&mut self) -> TesseraResult<()> {
        self.store = None;
        self.query_type = None;
        Ok(())
    }

    /// Whether the array is currently open.
    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// The query type the array was opened for.
    pub fn query_type(&self) -> TesseraResult<QueryType> {
        match self.query_type {
            Some(qt) => Ok(qt),
            None => tessera_bail!(SchemaUnavailable: "array '{}' is not open", self.uri),
        }
    }

    /// The schema of the open array, as a read-only snapshot.
    pub fn schema(&self) -> TesseraResult<ArraySchema> {
        let store = self.store()?;
        Ok(ArraySchema::from_data(store.schema().clone()))
    }

    pub(crate) fn store(&self) -> TesseraResult<&Arc<ArrayStore>> {
        match &self.store {
            Some(store) => Ok(store),
            None => tessera_bail!(SchemaUnavailable: "array '{}' is not open", self.uri),
        }
    }
}

#[cfg(test)]
mod test {
    use tessera_dtype::{ArrayType, Datatype, QueryType};
    use tessera_error::TesseraError;

    use crate::{Array, ArraySchema, Attribute, Context, Dimension, Domain};

    fn schema(ctx: &Context) -> ArraySchema {
        let mut domain = Domain::new(ctx);
        domain.add_dimension(Dimension::new(ctx, "d", Datatype::Int32, [1, 8], None).unwrap());
        let mut schema = ArraySchema::new(ctx, ArrayType::Dense);
        schema.set_domain(domain).unwrap();
        schema.add_attribute(Attribute::new(ctx, "a", Datatype::Int32).unwrap());
        schema
    }

    #[test]
    fn lifecycle() {
        let ctx = Context::new();
        let mut array = Array::new(&ctx, "life").unwrap();

        assert!(matches!(
            array.schema(),
            Err(TesseraError::SchemaUnavailable(_))
        ));
        assert!(array.open(QueryType::Read).is_err());

        array.create(schema(&ctx)).unwrap();
        array.open(QueryType::Read).unwrap();
        assert!(array.is_open());
        assert_eq!(array.query_type().unwrap(), QueryType::Read);
        assert_eq!(array.schema().unwrap().array_type(), ArrayType::Dense);

        assert!(array.open(QueryType::Write).is_err());
        array.close().unwrap();
        array.close().unwrap();
        assert!(!array.is_open());
        assert!(matches!(
            array.query_type(),
            Err(TesseraError::SchemaUnavailable(_))
        ));
    }

    #[test]
    fn create_twice_is_an_engine_failure() {
        let ctx = Context::new();
        let array = Array::new(&ctx, "dup").unwrap();
        array.create(schema(&ctx)).unwrap();
        let err = array.create(schema(&ctx));
        assert!(matches!(err, Err(TesseraError::EngineFailure(_))));
        assert!(ctx.last_error().is_some());
    }
}
