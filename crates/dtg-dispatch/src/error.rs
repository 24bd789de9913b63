use dtg_twin::{ResourceKey, ValueType};
use thiserror::Error;

/// Failure taxonomy of the dispatch core.
///
/// Cloneable so a failure can flow through the shared in-flight read future
/// to every caller that joined it; causes are flattened to strings for the
/// same reason.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No registered handler resolves for this key and provider.
    #[error("no suitable handler for {}", key.path_with_provider(provider))]
    NoHandlerFound { key: ResourceKey, provider: String },

    /// The handler's result is not assignable to the expected type.
    #[error("invalid result type for {key}: expected {expected}, got {actual}")]
    InvalidResultType {
        key: ResourceKey,
        expected: ValueType,
        actual: &'static str,
    },

    /// A reserved parameter kind was used in an operation that does not
    /// supply it. A configuration defect, not a runtime data error.
    #[error("parameter binding failed: {0}")]
    ParameterBinding(String),

    /// The handler failed, panicked, timed out, or the twin commit of its
    /// result was rejected. The cause chain is preserved in the message.
    #[error("invocation failed: {0}")]
    Invocation(String),

    /// The serialized gateway context has shut down.
    #[error("gateway context is closed")]
    GatewayClosed,
}
