use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tandem_core::ids::SynthesisSessionId;
use tandem_core::tools::{Tool, ToolDefinition, ToolDescriptor};

/// Where a tool in an agent's set came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolSource {
    BuiltIn,
    Synthesized { session_id: SynthesisSessionId },
}

#[derive(Clone)]
struct ToolEntry {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// One agent's private tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, ToolEntry>,
}

/// A tool set shared between an agent and whatever may extend it.
pub type SharedToolSet = Arc<RwLock<ToolSet>>;

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedToolSet {
        Arc::new(RwLock::new(self))
    }

    /// Register a tool, replacing any tool of the same name.
    /// Returns the source of the replaced tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>, source: ToolSource) -> Option<ToolSource> {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolEntry { tool, source }).map(|old| old.source)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| Arc::clone(&e.tool))
    }

    pub fn source(&self, name: &str) -> Option<&ToolSource> {
        self.tools.get(name).map(|e| &e.source)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|e| e.tool.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self.tools.values().map(|e| e.tool.descriptor().clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tandem_core::tools::{ToolContext, ToolError, ToolResult};

    struct Fixed {
        descriptor: ToolDescriptor,
    }

    fn fixed(name: &str, description: &str) -> Arc<dyn Tool> {
        Arc::new(Fixed {
            descriptor: ToolDescriptor::new(name, description),
        })
    }

    #[async_trait]
    impl Tool for Fixed {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }
        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::text(&self.descriptor.description))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut set = ToolSet::new();
        assert!(set.register(fixed("b_tool", "B"), ToolSource::BuiltIn).is_none());
        set.register(fixed("a_tool", "A"), ToolSource::BuiltIn);

        assert_eq!(set.names(), vec!["a_tool", "b_tool"]);
        assert_eq!(set.definitions()[0].name, "a_tool");
        assert!(set.contains("b_tool"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn same_name_replaces_and_reports_previous_source() {
        let mut set = ToolSet::new();
        set.register(fixed("convert", "v1"), ToolSource::BuiltIn);
        let session_id = SynthesisSessionId::from_raw("synth_1");
        let previous = set.register(
            fixed("convert", "v2"),
            ToolSource::Synthesized {
                session_id: session_id.clone(),
            },
        );

        assert_eq!(previous, Some(ToolSource::BuiltIn));
        assert_eq!(set.len(), 1);
        assert_eq!(set.descriptors()[0].description, "v2");
        assert_eq!(set.source("convert"), Some(&ToolSource::Synthesized { session_id }));
    }

    #[test]
    fn clones_are_independent_snapshots() {
        let shared = ToolSet::new().into_shared();
        shared.write().register(fixed("one", "1"), ToolSource::BuiltIn);
        let snapshot = shared.read().clone();
        shared.write().register(fixed("two", "2"), ToolSource::BuiltIn);

        assert_eq!(snapshot.names(), vec!["one"]);
        assert_eq!(shared.read().names(), vec!["one", "two"]);
        assert!(shared.write().unregister("one"));
        assert!(!shared.read().contains("one"));
    }
}
