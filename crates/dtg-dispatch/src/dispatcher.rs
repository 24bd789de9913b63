//! The dispatch pipeline: resolve a handler, bind its parameters, invoke it
//! on the worker context, normalize the result, and commit through the
//! serialized gateway context.

use std::collections::BTreeSet;
use std::sync::Arc;

use dtg_twin::{DigitalTwin, ResourceDeclaration, ResourceKey, TimedValue, ValueType, now_wallclock_ns};
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::binder::{BindContext, bind};
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::gateway::GatewayHandle;
use crate::handler::{Arg, HandlerRecord, HandlerResult, NullAction, OpKind, OwnerId, RegistrationEvent, ResourceHandler};
use crate::metrics::{MetricsHook, NoopMetrics};
use crate::normalize::{Normalized, normalize_result};
use crate::pending::PendingReads;
use crate::registry::HandlerRegistry;

/// Applies a normalized value to the twin on the gateway context. Supplied
/// by the model layer so the dispatch core stays ignorant of twin schemas.
pub type CommitFn = Box<dyn FnOnce(&mut dyn DigitalTwin, &TimedValue) -> anyhow::Result<()> + Send>;

/// Routes GET/SET/ACT requests to registered handlers.
///
/// Cheap to clone; clones share the registry, the in-flight read cache, and
/// the gateway context.
#[derive(Clone)]
pub struct ResourceDispatcher {
    registry: Arc<HandlerRegistry>,
    pending: Arc<PendingReads>,
    gateway: GatewayHandle,
    metrics: Arc<dyn MetricsHook>,
    config: DispatcherConfig,
}

impl ResourceDispatcher {
    /// Spawn the gateway context over `twin` and build a dispatcher around
    /// it. The join handle resolves once every dispatcher clone is dropped.
    pub fn new(twin: Box<dyn DigitalTwin>) -> (Self, JoinHandle<()>) {
        Self::with_config(twin, DispatcherConfig::default())
    }

    pub fn with_config(twin: Box<dyn DigitalTwin>, config: DispatcherConfig) -> (Self, JoinHandle<()>) {
        let (gateway, task) = GatewayHandle::spawn(twin);
        (
            Self {
                registry: Arc::new(HandlerRegistry::new()),
                pending: Arc::new(PendingReads::new()),
                gateway,
                metrics: Arc::new(NoopMetrics),
                config,
            },
            task,
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsHook>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &GatewayHandle {
        &self.gateway
    }

    pub fn pending(&self) -> &PendingReads {
        &self.pending
    }

    /// Invoke the ACT handler for `key` on behalf of `provider`.
    ///
    /// Actions must produce a value; a handler resolving without one is an
    /// invocation failure.
    pub async fn act(
        &self,
        key: &ResourceKey,
        provider: &str,
        args: Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        let _request = self.metrics.timer("dispatch.act.request");
        let record = self.resolve(OpKind::Act, key, provider)?;
        let bound = bind(
            &record.params,
            &BindContext {
                key,
                provider,
                args: Some(&args),
                expected: None,
                cached: None,
                new_value: None,
            },
        )?;
        match self.invoke("dispatch.act.task", record.handler, bound).await? {
            HandlerResult::Value(value) => Ok(value),
            HandlerResult::Timed(tv) => tv.value.ok_or_else(|| {
                DispatchError::Invocation(format!("action {key} resolved without a result"))
            }),
            HandlerResult::None => Err(DispatchError::Invocation(format!(
                "action {key} resolved without a result"
            ))),
        }
    }

    /// Read `key` through its GET handler, commit the normalized result to
    /// the twin, and resolve with it.
    ///
    /// Concurrent pulls of the same key collapse onto one handler
    /// invocation: late callers join the in-flight pipeline and receive the
    /// identical outcome, and their `commit` is dropped unused.
    ///
    /// Resolution happens before the in-flight cache is consulted, so a
    /// provider no record serves gets `NoHandlerFound` even while another
    /// provider's read is in flight.
    pub async fn pull_value(
        &self,
        key: &ResourceKey,
        provider: &str,
        expected: ValueType,
        cached: TimedValue,
        commit: CommitFn,
    ) -> Result<TimedValue, DispatchError> {
        let record = self.resolve(OpKind::Get, key, provider)?;
        let (shared, created) = self.pending.join_or_insert(key, {
            let this = self.clone();
            let key = key.clone();
            let provider = provider.to_string();
            move || {
                async move { this.run_pull(record, key, provider, expected, cached, commit).await }
                    .boxed()
                    .shared()
            }
        });
        if !created {
            tracing::debug!(%key, "joining in-flight read");
        }
        shared.await
    }

    /// Write `new_value` to `key` through its SET handler. Writes are never
    /// collapsed; every caller gets its own invocation, in order of arrival
    /// at the handler.
    pub async fn push_value(
        &self,
        key: &ResourceKey,
        provider: &str,
        expected: ValueType,
        cached: TimedValue,
        new_value: TimedValue,
        commit: CommitFn,
    ) -> Result<TimedValue, DispatchError> {
        let _request = self.metrics.timer("dispatch.push.request");
        let record = self.resolve(OpKind::Set, key, provider)?;
        let bound = bind(
            &record.params,
            &BindContext {
                key,
                provider,
                args: None,
                expected: Some(expected),
                cached: Some(&cached),
                new_value: Some(&new_value),
            },
        )?;
        let raw = self.invoke("dispatch.push.task", record.handler, bound).await?;
        // A write resolving without a value still marks the resource as
        // freshly set.
        let normalized = normalize_result(key, raw, expected, &cached, NullAction::Update, now_wallclock_ns())?;
        self.commit_normalized(normalized, commit).await
    }

    /// Register every capability of a newly appeared component: the backing
    /// resource is created on the twin first, then the handler record
    /// becomes resolvable. A capability whose resource declaration
    /// conflicts with an existing one is skipped with a warning; the rest
    /// of the event still applies.
    pub async fn on_handler_registered(&self, event: RegistrationEvent) -> Result<(), DispatchError> {
        for capability in event.capabilities {
            let declared = ResourceDeclaration {
                value_type: capability.declared_type,
                action: capability.kind == OpKind::Act,
            };
            let key = capability.key.clone();
            let ensured = self
                .gateway
                .execute(move |twin| twin.ensure_resource(&key, &declared))
                .await?;
            if let Err(cause) = ensured {
                tracing::warn!(
                    owner = %event.owner, key = %capability.key, kind = %capability.kind,
                    "capability skipped, twin rejected the resource declaration: {cause:#}"
                );
                continue;
            }
            tracing::debug!(
                owner = %event.owner, key = %capability.key, kind = %capability.kind,
                "handler registered"
            );
            self.registry.register(
                capability.kind,
                capability.key,
                HandlerRecord {
                    owner: event.owner,
                    providers: capability.providers,
                    params: capability.params,
                    on_null: capability.on_null,
                    handler: capability.handler,
                },
            );
        }
        Ok(())
    }

    /// Apply a provider-scope change to every record of `owner`.
    pub fn on_handler_updated(&self, owner: OwnerId, new_scope: &BTreeSet<String>) {
        self.registry.update(owner, new_scope);
    }

    /// Withdraw every record of `owner`.
    pub fn on_handler_removed(&self, owner: OwnerId) {
        tracing::debug!(%owner, "handler removed");
        self.registry.remove(owner);
    }

    fn resolve(
        &self,
        kind: OpKind,
        key: &ResourceKey,
        provider: &str,
    ) -> Result<HandlerRecord, DispatchError> {
        self.registry.resolve(kind, key, provider).ok_or_else(|| {
            DispatchError::NoHandlerFound {
                key: key.clone(),
                provider: provider.to_string(),
            }
        })
    }

    /// The read pipeline behind the in-flight cache, starting from an
    /// already resolved record. The pending entry is dropped as soon as
    /// the invocation settles, success or failure, so later pulls trigger
    /// a fresh invocation even after an error.
    async fn run_pull(
        self,
        record: HandlerRecord,
        key: ResourceKey,
        provider: String,
        expected: ValueType,
        cached: TimedValue,
        commit: CommitFn,
    ) -> Result<TimedValue, DispatchError> {
        let _request = self.metrics.timer("dispatch.pull.request");
        let HandlerRecord {
            params,
            on_null,
            handler,
            ..
        } = record;
        let invoked = async {
            let bound = bind(
                &params,
                &BindContext {
                    key: &key,
                    provider: &provider,
                    args: None,
                    expected: Some(expected),
                    cached: Some(&cached),
                    new_value: None,
                },
            )?;
            self.invoke("dispatch.pull.task", handler, bound).await
        }
        .await;
        self.pending.remove(&key);

        let raw = invoked?;
        let normalized = normalize_result(&key, raw, expected, &cached, on_null, now_wallclock_ns())?;
        self.commit_normalized(normalized, commit).await
    }

    /// Run the handler on its own worker task so a panic or a slow backend
    /// never takes the caller down with it.
    async fn invoke(
        &self,
        metric: &'static str,
        handler: Arc<dyn ResourceHandler>,
        args: Vec<Arg>,
    ) -> Result<HandlerResult, DispatchError> {
        let _task = self.metrics.timer(metric);
        let worker = tokio::spawn(async move { handler.invoke(args).await });
        let joined = match self.config.invoke_timeout {
            Some(limit) => match tokio::time::timeout(limit, worker).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(DispatchError::Invocation(format!(
                        "handler did not resolve within {limit:?}"
                    )));
                }
            },
            None => worker.await,
        };
        match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(cause)) => Err(DispatchError::Invocation(format!("{cause:#}"))),
            Err(join_error) => Err(DispatchError::Invocation(format!(
                "handler task failed: {join_error}"
            ))),
        }
    }

    async fn commit_normalized(
        &self,
        normalized: Normalized,
        commit: CommitFn,
    ) -> Result<TimedValue, DispatchError> {
        match normalized {
            Normalized::Skip(tv) => Ok(tv),
            Normalized::Commit(tv) => {
                let value = tv.clone();
                self.gateway
                    .execute(move |twin| commit(twin, &value))
                    .await?
                    .map_err(|cause| {
                        DispatchError::Invocation(format!("twin commit failed: {cause:#}"))
                    })?;
                Ok(tv)
            }
        }
    }
}
