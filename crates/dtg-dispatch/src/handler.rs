use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dtg_twin::{ResourceKey, TimedValue, ValueType};
use serde_json::Value;

use crate::binder::ParamSpec;

/// Opaque identifier of the component that registered a handler; used to
/// find its records again on update and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three operation kinds a resource handler can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Act,
    Get,
    Set,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpKind::Act => "act",
            OpKind::Get => "get",
            OpKind::Set => "set",
        })
    }
}

/// What to do when a read handler resolves with no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullAction {
    /// Leave the twin untouched and resolve with the no-op marker.
    Ignore,
    /// Fresh timestamped empty value if the cached value already carried a
    /// timestamp, otherwise behave like `Ignore`.
    UpdateIfPresent,
    /// Always produce a fresh timestamped empty value.
    #[default]
    Update,
}

/// One bound argument as handed to a handler by the parameter binder.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A reserved positional URI segment.
    Text(String),
    /// A named value from the operation's argument map; `None` when the
    /// caller did not supply it.
    Value(Option<Value>),
    /// The expected result type side channel.
    Type(ValueType),
    /// The cached-value or new-value side channel.
    Timed(TimedValue),
}

/// What a handler resolves with.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    /// No value; reads apply the record's [`NullAction`].
    None,
    /// A bare value; the dispatcher stamps it with a fresh timestamp.
    Value(Value),
    /// An explicitly timestamped value, passed through as-is.
    Timed(TimedValue),
}

/// Externally-supplied handler logic for one resource operation.
///
/// Invocations run on the worker context and may block or be slow; the
/// dispatch core never calls a handler from the serialized gateway context.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn invoke(&self, args: Vec<Arg>) -> anyhow::Result<HandlerResult>;
}

/// Adapts a plain async closure into a [`ResourceHandler`]; the usual way
/// bootstrap code and tests produce handlers.
pub struct FnHandler<F>(F);

impl<F, Fut> FnHandler<F>
where
    F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerResult>> + Send + 'static,
{
    pub fn new(f: F) -> Arc<dyn ResourceHandler> {
        Arc::new(FnHandler(f))
    }
}

#[async_trait]
impl<F, Fut> ResourceHandler for FnHandler<F>
where
    F: Fn(Vec<Arg>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HandlerResult>> + Send,
{
    async fn invoke(&self, args: Vec<Arg>) -> anyhow::Result<HandlerResult> {
        (self.0)(args).await
    }
}

/// A registered handler: bound logic plus its owner and provider scope.
///
/// Immutable once created; scope updates replace the record in the registry
/// list rather than mutating it.
#[derive(Clone)]
pub struct HandlerRecord {
    pub owner: OwnerId,
    /// Providers served by this record; empty means catch-all.
    pub providers: BTreeSet<String>,
    /// Declared parameter list, bound per invocation.
    pub params: Vec<ParamSpec>,
    pub on_null: NullAction,
    pub handler: Arc<dyn ResourceHandler>,
}

impl HandlerRecord {
    pub fn is_catch_all(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn matches_provider(&self, provider: &str) -> bool {
        self.providers.is_empty() || self.providers.contains(provider)
    }

    /// Two records overlap when both are catch-all, or both are
    /// provider-scoped with at least one provider in common.
    pub fn overlaps(&self, other: &HandlerRecord) -> bool {
        if self.is_catch_all() {
            other.is_catch_all()
        } else {
            !other.is_catch_all() && self.providers.intersection(&other.providers).next().is_some()
        }
    }
}

impl fmt::Debug for HandlerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRecord")
            .field("owner", &self.owner)
            .field("providers", &self.providers)
            .field("on_null", &self.on_null)
            .finish_non_exhaustive()
    }
}

/// One declared capability of a registering component: which operation of
/// which resource it handles, for which providers, with which parameters.
///
/// This is the declarative replacement for runtime discovery: whoever knows
/// how handlers are found (annotations, config, codegen) produces these at
/// bootstrap time.
pub struct Capability {
    pub kind: OpKind,
    pub key: ResourceKey,
    pub providers: BTreeSet<String>,
    pub params: Vec<ParamSpec>,
    pub on_null: NullAction,
    /// Declared type of the backing resource, used for idempotent
    /// twin-side creation.
    pub declared_type: ValueType,
    pub handler: Arc<dyn ResourceHandler>,
}

/// Lifecycle event announcing a handler-bearing component.
pub struct RegistrationEvent {
    pub owner: OwnerId,
    pub capabilities: Vec<Capability>,
}
