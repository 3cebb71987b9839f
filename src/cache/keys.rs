//! Cache key definitions.
//!
//! A cached output variation is addressed by the resource it was rendered from plus a
//! variation string describing the request parameters that shaped it.

use std::fmt;

use super::entry::ParameterMap;

/// Identifies one rendered variation of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    resource: String,
    variation: String,
}

impl CacheKey {
    pub fn new(resource: impl Into<String>, variation: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            variation: variation.into(),
        }
    }

    /// Builds a key whose variation is derived from the named request parameters.
    pub fn for_parameters(
        resource: impl Into<String>,
        parameters: &ParameterMap,
        names: &[&str],
    ) -> Self {
        Self::new(resource, variation_from_parameters(parameters, names))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn variation(&self) -> &str {
        &self.variation
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.resource, self.variation)
    }
}

/// Renders the named parameters as `name=v1,v2;name2=v3`, in the order given.
///
/// Parameters missing from the request are left out, so a request without any of the
/// names maps to the empty variation.
pub fn variation_from_parameters(parameters: &ParameterMap, names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| {
            parameters
                .get(*name)
                .map(|values| format!("{name}={}", values.join(",")))
        })
        .collect::<Vec<_>>()
        .join(";")
}
