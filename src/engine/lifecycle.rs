//! Engine singleton lifecycle.
//!
//! Building the engine is slow (device probing, capability checks, model
//! loading) and its result is shared by every request. [`EngineCell`] builds
//! it on first use, at most once, and hands the same `Arc` to every caller.
//! A failed build leaves the cell empty so the next caller tries again.
//!
//! The build runs on a blocking thread that outlives whichever caller
//! started it. A caller that is dropped mid-build parks the running build's
//! handle in the cell, and the next caller waits on that build instead of
//! starting another.
//!
//! The cell is owned by whoever composes the application and passed to the
//! handlers through router state; there is no global.

use crate::config::EngineConfig;
use crate::engine::ConversionEngine;
use crate::error::Doc2MdError;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Init = Arc<dyn Fn() -> Result<ConversionEngine, Doc2MdError> + Send + Sync>;
type Build = JoinHandle<Result<ConversionEngine, Doc2MdError>>;

/// Lazily built, shared [`ConversionEngine`].
pub struct EngineCell {
    cell: OnceCell<Arc<ConversionEngine>>,
    init: Init,
    /// A build whose caller went away before it finished.
    orphaned: Mutex<Option<Build>>,
}

impl fmt::Debug for EngineCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCell")
            .field("engine", &self.cell.get())
            .finish_non_exhaustive()
    }
}

impl EngineCell {
    /// Cell whose engine is produced by `init`, a blocking constructor.
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Result<ConversionEngine, Doc2MdError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Arc::new(init),
            orphaned: Mutex::new(None),
        }
    }

    /// Cell that builds the engine described by `config`.
    pub fn from_config(config: EngineConfig) -> Self {
        Self::new(move || ConversionEngine::initialize(&config))
    }

    /// Cell that already holds `engine`.
    pub fn ready(engine: ConversionEngine) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Arc::new(engine))),
            init: Arc::new(|| Err(Doc2MdError::Internal("engine already initialised".into()))),
            orphaned: Mutex::new(None),
        }
    }

    /// The engine, if it has been built.
    pub fn get(&self) -> Option<Arc<ConversionEngine>> {
        self.cell.get().cloned()
    }

    /// The shared engine, building it first if nobody has yet.
    ///
    /// Concurrent first callers wait on one construction, which runs on a
    /// blocking thread. Cancelling a caller does not cancel the build, and
    /// does not let a second one start.
    pub async fn get_or_create(&self) -> Result<Arc<ConversionEngine>, Doc2MdError> {
        let engine = self
            .cell
            .get_or_try_init(|| async {
                let handle = match self.take_orphaned() {
                    Some(handle) => {
                        debug!("Resuming engine build left by a cancelled caller");
                        handle
                    }
                    None => {
                        info!("Initialising conversion engine");
                        let init = Arc::clone(&self.init);
                        tokio::task::spawn_blocking(move || init())
                    }
                };
                let built = PendingBuild {
                    slot: &self.orphaned,
                    handle: Some(handle),
                }
                .join()
                .await;
                match built {
                    Ok(engine) => Ok(Arc::new(engine)),
                    Err(e) => {
                        error!(error = %e, "Conversion engine initialisation failed");
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(engine))
    }

    fn take_orphaned(&self) -> Option<Build> {
        self.orphaned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A running build owned by the caller awaiting it. Dropped before the build
/// finishes, it hands the build back to the cell.
struct PendingBuild<'a> {
    slot: &'a Mutex<Option<Build>>,
    handle: Option<Build>,
}

impl PendingBuild<'_> {
    async fn join(mut self) -> Result<ConversionEngine, Doc2MdError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(Doc2MdError::Internal("engine build handle missing".into()));
        };
        let joined = handle.await;
        self.handle = None;
        joined.map_err(|e| Doc2MdError::Internal(format!("Engine initialisation panicked: {e}")))?
    }
}

impl Drop for PendingBuild<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }
}
