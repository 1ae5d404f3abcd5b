use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative stop flag, polled once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Start/stop triggers for detection runs.
///
/// Pressing start while a run is active has no effect.
#[derive(Debug, Clone, Default)]
pub struct DetectionControls {
    running: Arc<AtomicBool>,
    stop: StopSignal,
}

impl DetectionControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single run slot. Returns `None` if a run is already active.
    pub fn try_start(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.stop.reset();
        Some(RunGuard {
            running: Arc::clone(&self.running),
            stop: self.stop.clone(),
        })
    }

    pub fn request_stop(&self) {
        self.stop.raise();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }
}

/// Marks a run as active until dropped.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
    stop: StopSignal,
}

impl RunGuard {
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_start_is_ignored_while_running() {
        let controls = DetectionControls::new();
        let guard = controls.try_start().unwrap();
        assert!(controls.is_running());
        assert!(controls.try_start().is_none());

        drop(guard);
        assert!(!controls.is_running());
        assert!(controls.try_start().is_some());
    }

    #[test]
    fn test_start_clears_previous_stop() {
        let controls = DetectionControls::new();
        controls.request_stop();
        assert!(controls.stop_signal().is_raised());

        let guard = controls.try_start().unwrap();
        assert!(!guard.stop_signal().is_raised());

        controls.request_stop();
        assert!(guard.stop_signal().is_raised());
    }
}
