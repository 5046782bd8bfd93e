use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sleep between pause checks.
pub const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Cooperative flags shared between a pipeline loop and its operator:
/// pause, stop, a pending state reset, and the health of the frame source as
/// last seen by the loop. Clones share the same flags.
#[derive(Clone, Debug, Default)]
pub struct PipelineControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    reset_requested: Arc<AtomicBool>,
    source_unhealthy: Arc<AtomicBool>,
}

impl PipelineControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// A control with its own flags that shares `stop` with others.
    pub fn with_stop(stopped: Arc<AtomicBool>) -> Self {
        Self {
            stopped,
            ..Self::default()
        }
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            log::info!("pipeline paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            log::info!("pipeline resumed");
        }
    }

    /// Flip the pause flag. Returns the new state.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.paused.fetch_xor(true, Ordering::SeqCst);
        log::info!("pipeline {}", if paused { "paused" } else { "resumed" });
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Ask the loop to clear its pipeline state before the next frame.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending reset request.
    pub(crate) fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::SeqCst)
    }

    /// Source health as last reported by the loop. True until a report says otherwise.
    pub fn is_source_healthy(&self) -> bool {
        !self.source_unhealthy.load(Ordering::SeqCst)
    }

    pub(crate) fn report_source_health(&self, name: &str, healthy: bool) {
        let was_unhealthy = self.source_unhealthy.swap(!healthy, Ordering::SeqCst);
        if was_unhealthy && healthy {
            log::info!("{} pipeline: frame source recovered", name);
        } else if !was_unhealthy && !healthy {
            log::warn!("{} pipeline: frame source unhealthy", name);
        }
    }

    /// Block while paused. Returns false if a stop was requested.
    pub(crate) fn wait_while_paused(&self) -> bool {
        while self.is_paused() {
            if self.is_stopped() {
                return false;
            }
            std::thread::sleep(PAUSE_POLL);
        }
        !self.is_stopped()
    }
}
