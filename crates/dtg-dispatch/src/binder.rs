//! Maps a handler's declared parameter list onto the context of one
//! invocation: reserved URI segments, named arguments with type coercion,
//! and the read/write side channels (expected type, cached value, new
//! value) that never collide with caller-supplied argument names.

use dtg_twin::{ResourceKey, TimedValue, ValueType};
use serde_json::{Map, Value};

use crate::error::DispatchError;
use crate::handler::Arg;

/// Reserved positional segments of the request URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriSegment {
    Namespace,
    Model,
    Provider,
    Service,
    Resource,
    /// The composed `model/provider/service/resource` path.
    Path,
}

/// One declared handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSpec {
    /// Bound from the request URI.
    Uri(UriSegment),
    /// Bound from the operation's named-argument map, coerced to `ty` when
    /// the supplied value is not already assignable.
    Named { name: String, ty: ValueType },
    /// Side channel: the expected result type (reads and writes only).
    ResultType,
    /// Side channel: the currently cached twin value (reads and writes only).
    CachedValue,
    /// Side channel: the value being written (writes only).
    NewValue,
}

/// Everything one invocation can bind from.
///
/// The side-channel fields are `None` for operations that do not supply
/// them; using a side-channel spec there is a binding error.
pub struct BindContext<'a> {
    pub key: &'a ResourceKey,
    pub provider: &'a str,
    pub args: Option<&'a Map<String, Value>>,
    pub expected: Option<ValueType>,
    pub cached: Option<&'a TimedValue>,
    pub new_value: Option<&'a TimedValue>,
}

/// Bind each declared parameter, in order, to an [`Arg`].
pub fn bind(params: &[ParamSpec], ctx: &BindContext<'_>) -> Result<Vec<Arg>, DispatchError> {
    params.iter().map(|spec| bind_one(spec, ctx)).collect()
}

fn bind_one(spec: &ParamSpec, ctx: &BindContext<'_>) -> Result<Arg, DispatchError> {
    match spec {
        ParamSpec::Uri(segment) => Ok(Arg::Text(match segment {
            UriSegment::Namespace => ctx.key.namespace_uri().to_string(),
            UriSegment::Model => ctx.key.model().to_string(),
            UriSegment::Provider => ctx.provider.to_string(),
            UriSegment::Service => ctx.key.service().to_string(),
            UriSegment::Resource => ctx.key.resource().to_string(),
            UriSegment::Path => ctx.key.path_with_provider(ctx.provider),
        })),
        ParamSpec::Named { name, ty } => {
            match ctx.args.and_then(|args| args.get(name)) {
                None => Ok(Arg::Value(None)),
                Some(value) if ty.matches(value) => Ok(Arg::Value(Some(value.clone()))),
                Some(value) => match ty.coerce(value.clone()) {
                    Some(coerced) => Ok(Arg::Value(Some(coerced))),
                    None => Err(DispatchError::Invocation(format!(
                        "argument '{name}' of {} is not convertible to {ty}",
                        ctx.key
                    ))),
                },
            }
        }
        ParamSpec::ResultType => ctx
            .expected
            .map(Arg::Type)
            .ok_or_else(|| reserved_unavailable("ResultType", ctx)),
        ParamSpec::CachedValue => ctx
            .cached
            .cloned()
            .map(Arg::Timed)
            .ok_or_else(|| reserved_unavailable("CachedValue", ctx)),
        ParamSpec::NewValue => ctx
            .new_value
            .cloned()
            .map(Arg::Timed)
            .ok_or_else(|| reserved_unavailable("NewValue", ctx)),
    }
}

fn reserved_unavailable(kind: &str, ctx: &BindContext<'_>) -> DispatchError {
    DispatchError::ParameterBinding(format!(
        "reserved parameter {kind} is not available in this operation (resource {})",
        ctx.key
    ))
}
