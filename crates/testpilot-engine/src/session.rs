//! Session lifecycle: one browser, one run, cancelable by id.

use crate::engine::{Engine, EngineOptions, ExecutionState};
use crate::planner::StepPlanner;
use crate::reasoner::Reasoner;
use crate::report::TestReport;
use crate::step::TestStep;
use crate::tracker::ProgressTracker;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use testpilot_browser::BrowserSurface;
use tracing::{info, warn};
use uuid::Uuid;

/// Opaque identifier for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cooperative cancellation flag, checked at the top of every cycle.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cloneable handle for aborting a session from another task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    shutdown: ShutdownFlag,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Request a graceful stop; the run ends at its next cycle boundary.
    pub fn abort(&self) {
        self.shutdown.set();
    }
}

/// One test run end to end: plan, cycle until done, reconcile, report.
pub struct Session {
    id: SessionId,
    surface: Box<dyn BrowserSurface>,
    engine: Engine,
    planner: StepPlanner,
    tracker: ProgressTracker,
    steps: Vec<TestStep>,
    shutdown: ShutdownFlag,
}

impl Session {
    pub fn new(
        surface: Box<dyn BrowserSurface>,
        reasoner: Arc<dyn Reasoner>,
        options: EngineOptions,
    ) -> Self {
        let shutdown = ShutdownFlag::new();
        Self {
            id: SessionId::new(),
            surface,
            engine: Engine::new(Arc::clone(&reasoner), options, shutdown.clone()),
            planner: StepPlanner::new(Arc::clone(&reasoner)),
            tracker: ProgressTracker::new(reasoner),
            steps: Vec::new(),
            shutdown,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn steps(&self) -> &[TestStep] {
        &self.steps
    }

    pub fn state(&self) -> &ExecutionState {
        self.engine.state()
    }

    /// Plan and execute `instruction` to completion. Always yields a report;
    /// failures live inside it, not in a `Result`.
    pub async fn run(&mut self, instruction: &str) -> TestReport {
        info!(session = %self.id, "planning run");
        self.steps = self.planner.plan(instruction).await;

        if self.steps.is_empty() {
            info!(session = %self.id, "nothing to execute");
            self.engine.complete_empty();
        } else {
            info!(session = %self.id, "executing {} steps", self.steps.len());
            while !self.engine.is_complete() {
                self.engine.cycle(self.surface.as_ref(), &self.steps).await;
                self.tracker
                    .reconcile(&mut self.steps, self.engine.state())
                    .await;
            }
        }

        let report = TestReport::synthesize(self.steps.clone(), self.engine.state());
        info!(session = %self.id, "{}", report.summary);
        report
    }

    /// Tear down the browser. Close failures are logged, not returned; the
    /// report already exists by the time this runs.
    pub async fn close(&mut self) {
        if let Err(e) = self.surface.close().await {
            warn!(session = %self.id, "browser close failed: {}", e);
        }
    }
}

/// Index of live sessions so callers can abort them by id.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: SessionHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.insert(handle.id(), handle);
    }

    /// Abort a session by id. Returns false for ids this registry does not
    /// know, including sessions already removed.
    pub fn abort(&self, id: SessionId) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.get(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: SessionId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
