//! Tool trait and registry.

use crate::runner::ToolContext;
use crate::ToolError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed tool future; object safety requires the box.
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + 'a>>;

/// Object-safe trait for tool implementations.
///
/// Any tool source — a local function, an external endpoint wrapper —
/// implements this. Tools are stored as `Arc<dyn ToolDyn>` and shared
/// read-only; all per-call state travels in the [`ToolContext`].
pub trait ToolDyn: Send + Sync {
    /// Unique name within the registry.
    fn name(&self) -> &str;

    /// Human-readable description handed to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the argument object. The runner validates against
    /// this before `invoke` ever runs.
    fn params_schema(&self) -> serde_json::Value;

    /// Whether the runner may re-run this tool once after an invocation
    /// failure.
    fn retryable(&self) -> bool {
        false
    }

    /// Execute with validated arguments.
    fn invoke(&self, args: serde_json::Value, ctx: ToolContext) -> ToolFuture<'_>;
}

impl std::fmt::Debug for dyn ToolDyn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// Name-indexed catalog of tools.
///
/// Built once at agent construction, then shared as `Arc<ToolRegistry>`
/// — there is no mutation API on a shared registry, so schema changes
/// require building a replacement.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolDyn>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolDyn>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool, failing with `NotFound` for unknown names.
    pub fn resolve(&self, name: &str) -> Result<&Arc<dyn ToolDyn>, ToolError> {
        self.tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Iterate over all registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolDyn>> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool built from a closure, for in-process function tools and tests.
///
/// The closure receives the validated argument object and the call
/// context and returns a boxed future.
pub struct FnTool<F> {
    name: String,
    description: String,
    schema: serde_json::Value,
    retryable: bool,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(serde_json::Value, ToolContext) -> ToolFuture<'static> + Send + Sync,
{
    /// Create a function tool.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        f: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            retryable: false,
            f,
        }
    }

    /// Mark the tool as safe to re-run once on failure.
    pub fn with_retry(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl<F> ToolDyn for FnTool<F>
where
    F: Fn(serde_json::Value, ToolContext) -> ToolFuture<'static> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn params_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn retryable(&self) -> bool {
        self.retryable
    }

    fn invoke(&self, args: serde_json::Value, ctx: ToolContext) -> ToolFuture<'_> {
        (self.f)(args, ctx)
    }
}
