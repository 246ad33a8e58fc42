use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Knobs that influence how the registry is turned into a model.
///
/// The configuration is part of the cache key, so two runs with different configurations never
/// share a cached model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// The API whose definitions are kept. Anything tagged with `api=` or `supported=` that doesn't
    /// list this name is dropped.
    pub api: String,

    /// Commands that are never turned into functions.
    pub excluded_functions: Vec<String>,

    /// The command that creates the top-level instance. It dispatches through the instance even
    /// though its first parameter isn't a handle.
    pub instance_creation_function: String,

    /// Types that are always used through at least one level of indirection.
    pub opaque_pointer_types: Vec<String>,

    /// Literal code fragments, keyed by function name, that templates splice into wrapper bodies.
    pub state_tracking: IndexMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api: "vulkan".to_owned(),
            excluded_functions: vec!["vkEnumerateInstanceVersion".to_owned()],
            instance_creation_function: "vkCreateInstance".to_owned(),
            opaque_pointer_types: [
                "Display",
                "xcb_connection_t",
                "wl_display",
                "wl_surface",
                "SECURITY_ATTRIBUTES",
                "ANativeWindow",
                "AHardwareBuffer",
                "IDirectFB",
                "IDirectFBSurface",
                "_screen_context",
                "_screen_window",
                "void",
            ]
            .into_iter()
            .map(ToOwned::to_owned)
            .collect(),
            state_tracking: IndexMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Returns whether a comma-separated `api`/`supported` list includes the configured API.
    /// A missing list places no constraint.
    pub fn contains_api(&self, api_list: Option<&str>) -> bool {
        api_list.map_or(true, |list| list.split(',').any(|api| api == self.api))
    }

    #[inline]
    pub fn is_excluded(&self, function: &str) -> bool {
        self.excluded_functions.iter().any(|name| name == function)
    }

    #[inline]
    pub fn is_opaque_pointer(&self, ty: &str) -> bool {
        self.opaque_pointer_types.iter().any(|name| name == ty)
    }

    /// Adds a state tracking fragment for `function`, replacing any previous one.
    pub fn with_state_tracking(mut self, function: &str, code: &str) -> Self {
        self.state_tracking
            .insert(function.to_owned(), code.to_owned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::RegistryConfig;

    #[test]
    fn api_lists() {
        let config = RegistryConfig::default();
        assert!(config.contains_api(None));
        assert!(config.contains_api(Some("vulkan,vulkansc")));
        assert!(!config.contains_api(Some("vulkansc")));
        assert!(!config.contains_api(Some("disabled")));
    }

    #[test]
    fn version_query_is_excluded() {
        let config = RegistryConfig::default();
        assert!(config.is_excluded("vkEnumerateInstanceVersion"));
        assert!(!config.is_excluded("vkCreateInstance"));
    }
}
