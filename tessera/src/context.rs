use std::sync::Arc;

use parking_lot::Mutex;
use tessera_engine::{Engine, EngineResult};
use tessera_error::{TesseraError, TesseraResult};

/// The entry point to the engine: owns the storage-manager handle and the
/// last-error slot.
///
/// Contexts are cheap to clone and share one engine instance. Multiple
/// queries created through the same context (or clones of it) may run
/// concurrently; the engine takes a shared lock for reads and writes and
/// requires exclusivity only for maintenance operations outside this
/// layer's scope.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    engine: Arc<Engine>,
    last_error: Mutex<Option<String>>,
}

impl Context {
    /// Create a context backed by a fresh engine instance.
    pub fn new() -> Self {
        Self::from_engine(Engine::new())
    }

    /// Create a context over an existing engine instance, sharing its
    /// arrays.
    pub fn from_engine(engine: Arc<Engine>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                engine,
                last_error: Mutex::new(None),
            }),
        }
    }

    /// The engine handle.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.inner.engine
    }

    /// The text of the most recent engine failure seen through this
    /// context, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Surface an engine result, recording failure text as the context's
    /// last error and propagating it verbatim.
    pub(crate) fn engine_result<T>(&self, result: EngineResult<T>) -> TesseraResult<T> {
        result.map_err(|e| {
            let message = e.message().to_string();
            *self.inner.last_error.lock() = Some(message.clone());
            TesseraError::EngineFailure(message)
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use tessera_error::TesseraError;

    use crate::Context;

    #[test]
    fn records_engine_failures() {
        let ctx = Context::new();
        assert_eq!(ctx.last_error(), None);

        let err = ctx.engine_result::<()>(Err(tessera_engine::EngineError::new("boom")));
        assert!(matches!(err, Err(TesseraError::EngineFailure(m)) if m == "boom"));
        assert_eq!(ctx.last_error().as_deref(), Some("boom"));

        assert!(ctx.engine_result(Ok(7)).is_ok());
        // Successes do not clear the slot; it reports the last failure.
        assert_eq!(ctx.last_error().as_deref(), Some("boom"));
    }

    #[test]
    fn clones_share_the_engine() {
        let ctx = Context::new();
        let other = ctx.clone();
        assert!(std::sync::Arc::ptr_eq(ctx.engine(), other.engine()));
    }
}
