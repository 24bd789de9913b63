//! Southbound resource dispatch core of the digital-twin gateway.
//!
//! Routes GET/SET/ACT requests for named resources to dynamically registered
//! handlers, with provider-scoped priority resolution, collapsing of
//! concurrent reads, and serialized application of results to the shared
//! twin state.
//!
//! Two execution contexts are involved: handler code runs on the tokio task
//! pool (the worker context), while every twin mutation is funneled through
//! a single [`gateway::GatewayHandle`] task (the serialized context).

pub mod binder;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod metrics;
pub mod normalize;
pub mod pending;
pub mod registry;

pub use binder::{BindContext, ParamSpec, UriSegment, bind};
pub use config::DispatcherConfig;
pub use dispatcher::{CommitFn, ResourceDispatcher};
pub use error::DispatchError;
pub use gateway::GatewayHandle;
pub use handler::{
    Arg, Capability, FnHandler, HandlerRecord, HandlerResult, NullAction, OpKind, OwnerId,
    RegistrationEvent, ResourceHandler,
};
pub use metrics::{MetricsHook, NoopMetrics, Timer};
pub use normalize::{Normalized, normalize_result};
pub use pending::PendingReads;
pub use registry::HandlerRegistry;
