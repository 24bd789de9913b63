use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::key::ResourceKey;
use crate::value::TimedValue;
use crate::value_type::ValueType;

/// What a handler registration declares about the resource it backs.
///
/// `action` distinguishes invocable (ACT) resources from value (GET/SET)
/// resources; a resource cannot be redeclared across that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub value_type: ValueType,
    pub action: bool,
}

impl ResourceDeclaration {
    pub fn value(value_type: ValueType) -> Self {
        Self {
            value_type,
            action: false,
        }
    }

    pub fn action(value_type: ValueType) -> Self {
        Self {
            value_type,
            action: true,
        }
    }
}

/// The digital-twin seam consumed by the serialized gateway executor.
///
/// Implementations are not required to be thread safe: all calls are funneled
/// through a single execution context by the dispatch core.
pub trait DigitalTwin: Send {
    /// Idempotently create the resource addressed by `key`. Fails if the
    /// resource already exists with a declaration incompatible with the
    /// capability being added (action vs. value).
    fn ensure_resource(
        &mut self,
        key: &ResourceKey,
        declared: &ResourceDeclaration,
    ) -> anyhow::Result<()>;

    /// Apply a normalized read/write result to the twin state.
    fn apply_value(&mut self, key: &ResourceKey, value: &TimedValue) -> anyhow::Result<()>;

    /// Current twin state for a resource, if it exists.
    fn value_of(&self, key: &ResourceKey) -> Option<TimedValue>;
}

/// One resource as held by [`MemoryTwin`].
#[derive(Debug, Clone, PartialEq)]
pub struct TwinRecord {
    pub declared: ResourceDeclaration,
    pub value: TimedValue,
}

/// In-memory [`DigitalTwin`] used by tests and as a reference for real
/// model-backed implementations.
#[derive(Debug, Default)]
pub struct MemoryTwin {
    resources: HashMap<ResourceKey, TwinRecord>,
}

impl MemoryTwin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn record(&self, key: &ResourceKey) -> Option<&TwinRecord> {
        self.resources.get(key)
    }
}

impl DigitalTwin for MemoryTwin {
    fn ensure_resource(
        &mut self,
        key: &ResourceKey,
        declared: &ResourceDeclaration,
    ) -> anyhow::Result<()> {
        match self.resources.get(key) {
            Some(existing) if existing.declared.action != declared.action => {
                anyhow::bail!(
                    "resource {key} already exists as {} resource",
                    if existing.declared.action { "an action" } else { "a value" }
                );
            }
            Some(_) => Ok(()),
            None => {
                self.resources.insert(
                    key.clone(),
                    TwinRecord {
                        declared: *declared,
                        value: TimedValue::EMPTY,
                    },
                );
                Ok(())
            }
        }
    }

    fn apply_value(&mut self, key: &ResourceKey, value: &TimedValue) -> anyhow::Result<()> {
        let record = self
            .resources
            .entry(key.clone())
            .or_insert_with(|| TwinRecord {
                declared: ResourceDeclaration::value(ValueType::Any),
                value: TimedValue::EMPTY,
            });
        record.value = value.clone();
        Ok(())
    }

    fn value_of(&self, key: &ResourceKey) -> Option<TimedValue> {
        self.resources.get(key).map(|r| r.value.clone())
    }
}
