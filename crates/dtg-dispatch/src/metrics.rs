//! Minimal timing hook. The dispatcher times each request and each handler
//! invocation; deployments plug in their own sink, the default discards
//! everything.

/// Sink for dispatch timing measurements.
///
/// Names follow `dispatch.<op>.request` for the whole pipeline and
/// `dispatch.<op>.task` for the handler invocation alone.
pub trait MetricsHook: Send + Sync {
    /// Start a timer; the returned guard reports on drop.
    fn timer(&self, name: &str) -> Timer;
}

/// Drop guard produced by [`MetricsHook::timer`].
pub struct Timer(Option<Box<dyn FnOnce() + Send>>);

impl Timer {
    pub fn new(on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(on_drop)))
    }

    pub fn noop() -> Self {
        Self(None)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(report) = self.0.take() {
            report();
        }
    }
}

/// Discards all measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsHook for NoopMetrics {
    fn timer(&self, _name: &str) -> Timer {
        Timer::noop()
    }
}
