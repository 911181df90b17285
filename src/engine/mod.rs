//! Conversion engine adapter.
//!
//! The document-understanding work happens in an external engine with a
//! blocking `convert(path)` call. This module wraps it for the async server:
//!
//! ```text
//!  EngineConfig ──▶ resolve_device ──▶ profile ladder ──▶ EngineFactory::build
//!                    (device.rs)      device+OCR            (docling.rs / vlm/)
//!                                     device only
//!                                     defaults
//!
//!  convert(path) ──▶ worker permit ──▶ spawn_blocking(engine.convert) ──▶ Markdown
//! ```
//!
//! The ladder tries richer configurations first and falls through, with a
//! warning, whenever the installed engine reports that it cannot honour one.
//! Only a fatal build error (engine missing altogether) stops the ladder.
//!
//! [`ConversionEngine::convert`] is bounded by a semaphore of `workers`
//! permits. The permit moves into the blocking task, so a request that stops
//! waiting does not free a slot while the engine is still busy.

pub mod device;
pub mod docling;
pub mod lifecycle;
#[cfg(feature = "vlm")]
pub mod vlm;

use crate::config::{EngineBackend, EngineConfig};
use crate::error::Doc2MdError;
use device::{resolve_device, AcceleratorProbe, Device, SystemProbe};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

// ── Engine seam ──────────────────────────────────────────────────────────

/// The engine's view of a converted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDocument {
    markdown: String,
}

impl ConvertedDocument {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
        }
    }

    pub fn export_to_markdown(&self) -> String {
        self.markdown.clone()
    }

    pub fn into_markdown(self) -> String {
        self.markdown
    }
}

/// A constructed external engine. `convert` blocks the calling thread.
pub trait DocumentEngine: Send + Sync {
    fn name(&self) -> &str;

    fn convert(&self, path: &Path) -> Result<ConvertedDocument, Doc2MdError>;
}

/// One rung of the configuration ladder. `None` leaves the engine's own default.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineProfile {
    pub device: Option<Device>,
    pub ocr: Option<bool>,
}

impl EngineProfile {
    /// `device + OCR` → `device only` → engine defaults.
    pub fn ladder(device: Device, ocr: bool) -> Vec<EngineProfile> {
        vec![
            EngineProfile {
                device: Some(device),
                ocr: Some(ocr),
            },
            EngineProfile {
                device: Some(device),
                ocr: None,
            },
            EngineProfile::default(),
        ]
    }
}

impl fmt::Display for EngineProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = self
            .device
            .map(|d| d.to_string())
            .unwrap_or_else(|| "default".into());
        let ocr = match self.ocr {
            Some(true) => "on",
            Some(false) => "off",
            None => "default",
        };
        write!(f, "device={device} ocr={ocr}")
    }
}

/// Why a factory could not build an engine for a profile.
#[derive(Debug)]
pub enum BuildError {
    /// The installed engine cannot honour this profile; try the next rung.
    Incompatible(String),
    /// The engine cannot be built at all.
    Fatal(Doc2MdError),
}

/// Builds a [`DocumentEngine`] for a profile, after checking the installed
/// engine can honour it.
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &str;

    fn build(&self, profile: &EngineProfile) -> Result<Arc<dyn DocumentEngine>, BuildError>;
}

/// Walk `ladder` until `factory` builds an engine.
pub fn build_with_fallback(
    factory: &dyn EngineFactory,
    ladder: &[EngineProfile],
) -> Result<(Arc<dyn DocumentEngine>, EngineProfile), Doc2MdError> {
    let mut rejected = Vec::new();
    for profile in ladder {
        match factory.build(profile) {
            Ok(engine) => {
                info!(engine = factory.name(), profile = %profile, "Conversion engine built");
                return Ok((engine, profile.clone()));
            }
            Err(BuildError::Incompatible(reason)) => {
                warn!(
                    engine = factory.name(),
                    profile = %profile,
                    reason = %reason,
                    "Engine configuration not supported; trying a simpler one"
                );
                rejected.push(format!("{profile}: {reason}"));
            }
            Err(BuildError::Fatal(e)) => return Err(e),
        }
    }
    Err(Doc2MdError::EngineInit(format!(
        "{} accepted none of the configurations tried ({})",
        factory.name(),
        rejected.join("; ")
    )))
}

/// Factory for the configured backend.
pub fn factory_for(config: &EngineConfig) -> Result<Box<dyn EngineFactory>, Doc2MdError> {
    match config.backend {
        EngineBackend::Docling => Ok(Box::new(docling::DoclingFactory::new(
            config.docling_path.clone(),
            config.conversion_timeout_secs,
        ))),
        #[cfg(feature = "vlm")]
        EngineBackend::Vlm => Ok(Box::new(vlm::VlmFactory::new(config.vlm.clone()))),
        #[cfg(not(feature = "vlm"))]
        EngineBackend::Vlm => Err(Doc2MdError::InvalidConfig(
            "the vlm engine requires building with `--features vlm`".into(),
        )),
    }
}

// ── Adapter ──────────────────────────────────────────────────────────────

/// The process-wide conversion engine: a built backend plus its worker pool.
pub struct ConversionEngine {
    backend: Arc<dyn DocumentEngine>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    profile: EngineProfile,
    timeout: Option<Duration>,
}

impl fmt::Debug for ConversionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionEngine")
            .field("backend", &self.backend.name())
            .field("workers", &self.worker_count)
            .field("profile", &self.profile)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ConversionEngine {
    /// Probe the host and build the configured backend. Blocks: run it on a
    /// blocking thread.
    pub fn initialize(config: &EngineConfig) -> Result<Self, Doc2MdError> {
        let factory = factory_for(config)?;
        Self::initialize_with(config, factory.as_ref(), &SystemProbe)
    }

    pub fn initialize_with(
        config: &EngineConfig,
        factory: &dyn EngineFactory,
        probe: &dyn AcceleratorProbe,
    ) -> Result<Self, Doc2MdError> {
        let started = Instant::now();
        let device = resolve_device(config.device, probe);
        let ladder = EngineProfile::ladder(device, config.ocr);
        let (backend, profile) = build_with_fallback(factory, &ladder)?;

        info!(
            engine = backend.name(),
            profile = %profile,
            workers = config.workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Conversion engine ready"
        );

        Ok(Self::with_backend(backend, config.workers)
            .with_profile(profile)
            .with_timeout(config.conversion_timeout()))
    }

    /// Wrap an already-built backend.
    pub fn with_backend(backend: Arc<dyn DocumentEngine>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            backend,
            workers: Arc::new(Semaphore::new(workers)),
            worker_count: workers,
            profile: EngineProfile::default(),
            timeout: None,
        }
    }

    pub fn with_profile(mut self, profile: EngineProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    pub fn workers(&self) -> usize {
        self.worker_count
    }

    /// Convert the document at `path` on a blocking worker.
    pub async fn convert(&self, path: &Path) -> Result<ConvertedDocument, Doc2MdError> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| Doc2MdError::Internal("conversion worker pool closed".into()))?;

        let backend = Arc::clone(&self.backend);
        let owned = path.to_path_buf();
        debug!(path = %owned.display(), engine = backend.name(), "Dispatching conversion");

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let started = Instant::now();
            let result = backend.convert(&owned);
            // Windows keeps the input locked briefly after the engine returns.
            #[cfg(windows)]
            std::thread::sleep(Duration::from_millis(100));
            (result, started.elapsed())
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        path = %path.display(),
                        timeout_secs = limit.as_secs(),
                        "Conversion timed out; the worker keeps running until the engine returns"
                    );
                    return Err(Doc2MdError::ConversionTimeout {
                        secs: limit.as_secs(),
                    });
                }
            },
            None => task.await,
        };

        let (result, elapsed) =
            joined.map_err(|e| Doc2MdError::Internal(format!("Conversion task panicked: {e}")))?;
        match &result {
            Ok(doc) => info!(
                path = %path.display(),
                elapsed_ms = elapsed.as_millis() as u64,
                markdown_bytes = doc.markdown.len(),
                "Conversion finished"
            ),
            Err(e) => warn!(
                path = %path.display(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Conversion failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Echo;

    impl DocumentEngine for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn convert(&self, path: &Path) -> Result<ConvertedDocument, Doc2MdError> {
            Ok(ConvertedDocument::new(format!(
                "# {}",
                path.file_name().unwrap().to_string_lossy()
            )))
        }
    }

    /// Rejects any profile that sets OCR.
    struct NoOcrFactory {
        seen: Mutex<Vec<EngineProfile>>,
    }

    impl EngineFactory for NoOcrFactory {
        fn name(&self) -> &str {
            "no-ocr"
        }
        fn build(&self, profile: &EngineProfile) -> Result<Arc<dyn DocumentEngine>, BuildError> {
            self.seen.lock().unwrap().push(profile.clone());
            if profile.ocr.is_some() {
                return Err(BuildError::Incompatible("ocr option unknown".into()));
            }
            Ok(Arc::new(Echo))
        }
    }

    struct Missing;

    impl EngineFactory for Missing {
        fn name(&self) -> &str {
            "missing"
        }
        fn build(&self, _: &EngineProfile) -> Result<Arc<dyn DocumentEngine>, BuildError> {
            Err(BuildError::Fatal(Doc2MdError::EngineInit("not installed".into())))
        }
    }

    struct NoGpu;

    impl AcceleratorProbe for NoGpu {
        fn cuda_devices(&self) -> usize {
            0
        }
        fn mps_available(&self) -> bool {
            false
        }
    }

    #[test]
    fn ladder_order() {
        let ladder = EngineProfile::ladder(Device::Cpu, true);
        assert_eq!(ladder.len(), 3);
        assert_eq!(ladder[0].ocr, Some(true));
        assert_eq!(ladder[1].device, Some(Device::Cpu));
        assert_eq!(ladder[1].ocr, None);
        assert_eq!(ladder[2], EngineProfile::default());
    }

    #[test]
    fn incompatible_profiles_fall_through() {
        let factory = NoOcrFactory {
            seen: Mutex::new(Vec::new()),
        };
        let (engine, profile) =
            build_with_fallback(&factory, &EngineProfile::ladder(Device::Cpu, true)).unwrap();
        assert_eq!(engine.name(), "echo");
        assert_eq!(profile.device, Some(Device::Cpu));
        assert_eq!(profile.ocr, None);
        assert_eq!(factory.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn fatal_error_stops_the_ladder() {
        let err = build_with_fallback(&Missing, &EngineProfile::ladder(Device::Cpu, true))
            .err()
            .expect("expected an error");
        assert!(matches!(err, Doc2MdError::EngineInit(_)));
    }

    #[test]
    fn unavailable_accelerator_degrades_to_cpu() {
        let factory = NoOcrFactory {
            seen: Mutex::new(Vec::new()),
        };
        let config = EngineConfig {
            device: Device::Cuda { index: None },
            ..EngineConfig::default()
        };
        let engine = ConversionEngine::initialize_with(&config, &factory, &NoGpu).unwrap();
        assert_eq!(engine.profile().device, Some(Device::Cpu));
        assert_eq!(factory.seen.lock().unwrap()[0].device, Some(Device::Cpu));
    }

    #[tokio::test]
    async fn convert_runs_backend() {
        let engine = ConversionEngine::with_backend(Arc::new(Echo), 1);
        let doc = engine.convert(Path::new("/tmp/report.pdf")).await.unwrap();
        assert_eq!(doc.export_to_markdown(), "# report.pdf");
    }

    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl DocumentEngine for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn convert(&self, _: &Path) -> Result<ConvertedDocument, Doc2MdError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ConvertedDocument::new("done"))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_bound_concurrency() {
        let slow = Arc::new(Slow {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::from_millis(30),
        });
        let engine = Arc::new(ConversionEngine::with_backend(slow.clone(), 2));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.convert(Path::new("x.pdf")).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert!(slow.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_keeps_permit_until_worker_finishes() {
        let slow = Arc::new(Slow {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::from_millis(300),
        });
        let engine = ConversionEngine::with_backend(slow.clone(), 1)
            .with_timeout(Some(Duration::from_millis(20)));

        let err = engine.convert(Path::new("x.pdf")).await.unwrap_err();
        assert!(matches!(err, Doc2MdError::ConversionTimeout { .. }));
        // The abandoned worker still holds the only permit.
        assert_eq!(engine.workers.available_permits(), 0);
        assert_eq!(slow.active.load(Ordering::SeqCst), 1);
    }
}
