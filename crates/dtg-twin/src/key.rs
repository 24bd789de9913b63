use std::fmt;

use serde::{Deserialize, Serialize};

/// Base URI prepended to the model name when a registration or request does
/// not carry an explicit namespace.
pub const DEFAULT_NAMESPACE_BASE: &str = "https://twin.local/model/";

/// Identity of a resource: namespace, model, service and resource name.
///
/// Pure value type; constructed per lookup or registration and compared
/// structurally. The namespace is derived from the model name when the
/// caller leaves it absent or blank, so two keys for the same resource are
/// equal no matter which form the caller used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    namespace_uri: String,
    model: String,
    service: String,
    resource: String,
}

impl ResourceKey {
    pub fn new(
        namespace_uri: Option<&str>,
        model: &str,
        service: &str,
        resource: &str,
    ) -> Self {
        let namespace_uri = match namespace_uri {
            Some(ns) if !ns.trim().is_empty() => ns.to_string(),
            _ => format!("{DEFAULT_NAMESPACE_BASE}{model}"),
        };
        Self {
            namespace_uri,
            model: model.to_string(),
            service: service.to_string(),
            resource: resource.to_string(),
        }
    }

    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Path form used in logs and composed URI parameters:
    /// `model/provider/service/resource`.
    pub fn path_with_provider(&self, provider: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.model, provider, self.service, self.resource
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.model, self.service, self.resource)
    }
}
