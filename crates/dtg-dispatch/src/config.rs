use std::time::Duration;

/// Tunables of the dispatch core.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Upper bound on a single handler invocation. `None` (the default)
    /// lets handlers run unbounded, matching twins whose backends have
    /// their own deadlines.
    pub invoke_timeout: Option<Duration>,
}

impl DispatcherConfig {
    pub fn with_invoke_timeout(timeout: Duration) -> Self {
        Self {
            invoke_timeout: Some(timeout),
        }
    }
}
