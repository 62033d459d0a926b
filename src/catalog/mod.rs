//! Tool catalog
//!
//! Typed descriptors of installable tools, keyed by name and version. The
//! built-in catalog is assembled once per process and read-only afterwards;
//! callers that need extra tools build their own [`ToolCatalog`].

mod builtin;
pub mod tool;

pub use tool::{
    cache_key_for, is_pinned, InstallMethod, PackageManager, SharedCache, ToolSpec,
    TOOL_CACHE_PREFIX,
};

use crate::error::{SandkitError, SandkitResult};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Registry of tool descriptors
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, BTreeMap<String, ToolSpec>>,
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-loaded with the built-in tools
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for tool in builtin::builtin_tools() {
            // Built-ins are distinct by construction
            if let Err(e) = catalog.register(tool) {
                debug!("Skipping built-in tool: {}", e);
            }
        }
        catalog
    }

    /// Process-wide built-in catalog
    pub fn global() -> &'static ToolCatalog {
        static CATALOG: OnceLock<ToolCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::with_builtins)
    }

    /// Register a tool.
    ///
    /// Re-registering an identical descriptor is a no-op; registering the
    /// same name and version with a different install method is rejected.
    pub fn register(&mut self, tool: ToolSpec) -> SandkitResult<()> {
        let versions = self.tools.entry(tool.name.clone()).or_default();

        if let Some(existing) = versions.get(&tool.version) {
            if existing.method != tool.method {
                return Err(SandkitError::DuplicateTool {
                    name: tool.name,
                    version: tool.version,
                    reason: format!(
                        "already registered with install method {}",
                        existing.method.label()
                    ),
                });
            }
            return Ok(());
        }

        debug!("Registered tool {} {}", tool.name, tool.version);
        versions.insert(tool.version.clone(), tool);
        Ok(())
    }

    /// Look up a tool by name, returning its highest registered version
    pub fn lookup(&self, name: &str) -> SandkitResult<&ToolSpec> {
        self.tools
            .get(name)
            .and_then(|versions| {
                versions.values().max_by(|a, b| {
                    let key_a = (tool::version_order_key(&a.version), &a.version);
                    let key_b = (tool::version_order_key(&b.version), &b.version);
                    key_a.cmp(&key_b)
                })
            })
            .ok_or_else(|| SandkitError::UnknownTool(name.to_string()))
    }

    /// Look up an exact name and version
    pub fn lookup_version(&self, name: &str, version: &str) -> SandkitResult<&ToolSpec> {
        self.tools
            .get(name)
            .and_then(|versions| versions.get(version))
            .ok_or_else(|| SandkitError::UnknownTool(format!("{} {}", name, version)))
    }

    /// All tools, ordered by name then version string
    pub fn tools(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values().flat_map(|versions| versions.values())
    }

    pub fn len(&self) -> usize {
        self.tools.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
