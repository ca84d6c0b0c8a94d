// src/pipeline/engine.rs
//
// Long-lived owner of the capabilities and the shared state a request layer
// talks to. At most one session runs per engine; the frame loop executes on a
// blocking worker while status, settings and stop requests are served from
// other tasks through cheap clones of this handle.

use super::metrics::{MetricsSummary, SessionMetrics};
use super::session::{SessionObserver, StreamSession};
use super::settings::{LiveSettings, SettingsUpdate, SharedSettings};
use super::status::{SharedStatus, StatusBoard};
use crate::capability::{PlateRecognizer, VehicleDetector};
use crate::error::{EngineError, Result};
use crate::types::{RunSummary, SessionConfig};
use crate::video_processor::FrameSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info};

const DEFAULT_FALLBACK_FPS: f64 = 30.0;

#[derive(Clone)]
pub struct Engine {
    detector: Arc<Mutex<Box<dyn VehicleDetector>>>,
    recognizer: Arc<Mutex<Box<dyn PlateRecognizer>>>,
    settings: SharedSettings,
    status: StatusBoard,
    metrics: SessionMetrics,
    /// Stop flag of the most recently claimed session. Each session gets a
    /// fresh flag, so a stale handle can never stop a later session.
    current_stop: Arc<Mutex<Arc<AtomicBool>>>,
    busy: Arc<AtomicBool>,
    fallback_fps: f64,
}

/// Everything a claimed session needs from the engine.
struct Claim {
    _guard: BusyGuard,
    stop: Arc<AtomicBool>,
}

/// Clears the busy flag when the session ends, however it ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a session running on a blocking worker. Stopping through it
/// only ever affects that session.
pub struct SessionHandle {
    join: JoinHandle<Result<RunSummary>>,
    stop: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> Result<RunSummary> {
        self.join
            .await
            .map_err(|e| EngineError::WorkerFailed(e.to_string()))?
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Engine {
    pub fn new(detector: Box<dyn VehicleDetector>, recognizer: Box<dyn PlateRecognizer>) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            recognizer: Arc::new(Mutex::new(recognizer)),
            settings: SharedSettings::new(LiveSettings::from(SessionConfig::default())),
            status: StatusBoard::new(),
            metrics: SessionMetrics::new(),
            current_stop: Arc::new(Mutex::new(Arc::new(AtomicBool::new(false)))),
            busy: Arc::new(AtomicBool::new(false)),
            fallback_fps: DEFAULT_FALLBACK_FPS,
        }
    }

    pub fn with_fallback_fps(mut self, fps: f64) -> Self {
        self.fallback_fps = fps;
        self
    }

    /// Validate, take the single session slot and reset per-run state.
    /// The session gets its own stop flag, so no earlier stop carries over.
    fn claim(&self, config: &SessionConfig) -> Result<Claim> {
        config.validate()?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::SessionBusy);
        }
        let guard = BusyGuard(self.busy.clone());

        let stop = Arc::new(AtomicBool::new(false));
        *lock(&self.current_stop) = stop.clone();
        self.settings.replace(LiveSettings::from(*config));
        self.metrics.reset();
        self.status.begin_session();

        info!(
            "Session claimed: speed_limit={:.0} km/h, frame_skip={}, confidence={:.2}",
            config.speed_limit, config.frame_skip, config.confidence_threshold
        );
        Ok(Claim {
            _guard: guard,
            stop,
        })
    }

    fn drive(
        &self,
        claim: Claim,
        source: &mut dyn FrameSource,
        observer: Option<&mut dyn SessionObserver>,
    ) -> Result<RunSummary> {
        let mut detector = lock(&self.detector);
        let mut recognizer = lock(&self.recognizer);
        let mut board = self.status.clone();

        let mut session =
            StreamSession::new(&mut **detector, &mut **recognizer, self.settings.clone())
                .with_stop_flag(claim.stop.clone())
                .with_metrics(self.metrics.clone())
                .with_fallback_fps(self.fallback_fps)
                .with_observer(&mut board);

        if let Some(observer) = observer {
            session = session.with_observer(observer);
        }

        let result = session.run(source);
        self.status.end_session();

        if let Err(e) = &result {
            error!("Session failed: {}", e);
        }
        result
    }

    /// Run a session to completion on the calling thread.
    pub fn run_session(
        &self,
        source: &mut dyn FrameSource,
        config: SessionConfig,
        observer: Option<&mut dyn SessionObserver>,
    ) -> Result<RunSummary> {
        let claim = self.claim(&config)?;
        self.drive(claim, source, observer)
    }

    /// Start a session on a blocking worker and return immediately.
    /// Must be called from within a Tokio runtime.
    pub fn start_session<S>(
        &self,
        mut source: S,
        config: SessionConfig,
        observer: Option<Box<dyn SessionObserver>>,
    ) -> Result<SessionHandle>
    where
        S: FrameSource + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::WorkerFailed(e.to_string()))?;
        let claim = self.claim(&config)?;
        let stop = claim.stop.clone();

        let engine = self.clone();
        let join = runtime.spawn_blocking(move || {
            let mut observer = observer;
            let observer = observer
                .as_mut()
                .map(|o| &mut **o as &mut dyn SessionObserver);
            engine.drive(claim, &mut source, observer)
        });

        Ok(SessionHandle { join, stop })
    }

    /// Request a stop of the current session; observed at the next frame
    /// boundary. Idempotent. With nothing running it only marks the finished
    /// session's flag, which no later session reads.
    pub fn stop_session(&self) {
        if self.is_running() {
            info!("Stop requested");
        }
        lock(&self.current_stop).store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SharedStatus {
        self.status.snapshot()
    }

    pub fn settings(&self) -> LiveSettings {
        self.settings.snapshot()
    }

    /// Applies to the running session from its next frame.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<LiveSettings> {
        self.settings.apply(update)
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }
}
