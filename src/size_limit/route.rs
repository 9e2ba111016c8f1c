use std::sync::Arc;

use super::config::{RouteSizeOverride, validate_settings};
use super::error::ConfigError;

/// Looks up the size override attached to a request's route.
///
/// The filter calls this at most once per request, on its first callback.
pub trait RouteLookup {
    fn size_override(&self) -> Option<RouteSizeOverride>;
}

impl RouteLookup for Option<RouteSizeOverride> {
    fn size_override(&self) -> Option<RouteSizeOverride> {
        *self
    }
}

/// Path-prefix table of route overrides. The longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    // Kept sorted by descending prefix length.
    entries: Vec<(String, RouteSizeOverride)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style method to add a route override.
    pub fn with_route(
        mut self,
        path_prefix: impl Into<String>,
        size_override: RouteSizeOverride,
    ) -> Result<Self, ConfigError> {
        self.insert(path_prefix, size_override)?;
        Ok(self)
    }

    /// Adds or replaces the override for `path_prefix`.
    ///
    /// The prefix must start with `/`, and an enabled override needs a
    /// non-zero `max_bytes`.
    pub fn insert(
        &mut self,
        path_prefix: impl Into<String>,
        size_override: RouteSizeOverride,
    ) -> Result<(), ConfigError> {
        let path_prefix = path_prefix.into();
        if !path_prefix.starts_with('/') {
            return Err(ConfigError::InvalidPathPrefix(path_prefix));
        }
        validate_settings(size_override.settings(), &format!("route '{path_prefix}'"))?;

        if let Some(entry) = self.entries.iter_mut().find(|(p, _)| *p == path_prefix) {
            entry.1 = size_override;
            return Ok(());
        }

        let pos = self
            .entries
            .iter()
            .position(|(p, _)| p.len() < path_prefix.len())
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (path_prefix, size_override));
        Ok(())
    }

    /// Returns the override of the longest prefix matching `path`.
    ///
    /// Matching is per path segment: `/upload` covers `/upload` and
    /// `/upload/a` but not `/uploads`.
    pub fn lookup(&self, path: &str) -> Option<RouteSizeOverride> {
        self.entries
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, size_override)| *size_override)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// Route lookup for one request.
///
/// An override pinned on the request (through its extensions) takes precedence
/// over the shared table.
#[derive(Debug, Clone)]
pub struct RequestRoute {
    table: Arc<RouteTable>,
    path: String,
    pinned: Option<RouteSizeOverride>,
}

impl RequestRoute {
    pub fn new(table: Arc<RouteTable>, path: impl Into<String>, pinned: Option<RouteSizeOverride>) -> Self {
        Self {
            table,
            path: path.into(),
            pinned,
        }
    }
}

impl RouteLookup for RequestRoute {
    fn size_override(&self) -> Option<RouteSizeOverride> {
        self.pinned.or_else(|| self.table.lookup(&self.path))
    }
}
