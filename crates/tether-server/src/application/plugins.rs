//! Page plugins applied in dependency order.
//!
//! A plugin contributes to the [`PageTemplate`] before the page builder runs
//! (a stylesheet, a helper script, a body fragment).  Plugins may depend on
//! other plugins; [`PluginSet::apply_all`] applies each dependency before its
//! dependents and every plugin at most once, identified by name.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::domain::PageTemplate;

pub trait Plugin: Send + Sync {
    /// Unique name; two plugins with the same name are the same plugin.
    fn name(&self) -> &str;

    /// Plugins that must be applied before this one.
    fn dependencies(&self) -> Vec<Arc<dyn Plugin>> {
        Vec::new()
    }

    fn apply(&self, page: &mut PageTemplate);
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    /// `path` lists the plugin names from the first repeated one back to itself.
    #[error("plugin dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

#[derive(Default, Clone)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn add(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Applies every plugin and its dependencies to `page`.
    ///
    /// Returns the names in application order.
    ///
    /// # Errors
    ///
    /// [`PluginError::Cycle`] if a plugin depends on itself, directly or
    /// through others.  Plugins applied before the cycle was found stay
    /// applied.
    pub fn apply_all(&self, page: &mut PageTemplate) -> Result<Vec<String>, PluginError> {
        let mut applied = Vec::new();
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        for plugin in &self.plugins {
            visit(plugin, page, &mut visited, &mut path, &mut applied)?;
        }
        Ok(applied)
    }
}

fn visit(
    plugin: &Arc<dyn Plugin>,
    page: &mut PageTemplate,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
    applied: &mut Vec<String>,
) -> Result<(), PluginError> {
    let name = plugin.name().to_owned();
    if visited.contains(&name) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|n| *n == name) {
        let mut cycle = path[start..].to_vec();
        cycle.push(name);
        return Err(PluginError::Cycle { path: cycle });
    }
    path.push(name.clone());
    for dependency in plugin.dependencies() {
        visit(&dependency, page, visited, path, applied)?;
    }
    path.pop();
    plugin.apply(page);
    debug!(plugin = %name, "plugin applied");
    visited.insert(name.clone());
    applied.push(name);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
