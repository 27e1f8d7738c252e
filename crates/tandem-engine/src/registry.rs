use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use tandem_core::agent::{Agent, AgentDescriptor};

use crate::error::EngineError;
use crate::toolset::SharedToolSet;

#[derive(Clone)]
struct AgentEntry {
    agent: Arc<dyn Agent>,
    tools: Option<SharedToolSet>,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    entries: HashMap<String, AgentEntry>,
}

/// Name-indexed agents, kept in registration order.
#[derive(Default)]
pub struct AgentRegistry {
    inner: RwLock<Inner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent that exposes no tool set.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Result<(), EngineError> {
        self.insert(agent, None)
    }

    /// Register an agent together with the tool set synthesized tools go into.
    pub fn register_with_tools(&self, agent: Arc<dyn Agent>, tools: SharedToolSet) -> Result<(), EngineError> {
        self.insert(agent, Some(tools))
    }

    fn insert(&self, agent: Arc<dyn Agent>, tools: Option<SharedToolSet>) -> Result<(), EngineError> {
        let name = agent.name().to_string();
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&name) {
            return Err(EngineError::DuplicateAgent(name));
        }
        info!(agent = %name, has_tools = tools.is_some(), "agent registered");
        inner.order.push(name.clone());
        inner.entries.insert(name, AgentEntry { agent, tools });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.inner.read().entries.get(name).map(|e| Arc::clone(&e.agent))
    }

    pub fn descriptor(&self, name: &str) -> Option<AgentDescriptor> {
        self.get(name).map(|a| a.descriptor())
    }

    /// The agent's private tool set, if it has one.
    pub fn tools(&self, name: &str) -> Option<SharedToolSet> {
        self.inner.read().entries.get(name).and_then(|e| e.tools.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().entries.contains_key(name)
    }

    /// Agents in registration order.
    pub fn list(&self) -> Vec<Arc<dyn Agent>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.entries.get(name).map(|e| Arc::clone(&e.agent)))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.list().iter().map(|a| a.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tandem_core::agent::{AgentContext, AgentError};

    use crate::toolset::ToolSet;

    struct Named(&'static str);

    #[async_trait]
    impl Agent for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test agent"
        }
        async fn handle_message(&self, _message: &str, _ctx: &AgentContext) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    #[test]
    fn keeps_registration_order() {
        let registry = AgentRegistry::new();
        for name in ["s3", "ec2", "billing"] {
            registry.register(Arc::new(Named(name))).unwrap();
        }
        assert_eq!(registry.names(), vec!["s3", "ec2", "billing"]);
        let listed: Vec<String> = registry.list().iter().map(|a| a.name().to_string()).collect();
        assert_eq!(listed, registry.names());
        assert_eq!(registry.descriptors()[1].name, "ec2");
    }

    #[test]
    fn rejects_duplicates() {
        let registry = AgentRegistry::new();
        registry.register(Arc::new(Named("ec2"))).unwrap();
        let err = registry.register(Arc::new(Named("ec2"))).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateAgent(ref n) if n == "ec2"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        registry
            .register_with_tools(Arc::new(Named("s3")), ToolSet::new().into_shared())
            .unwrap();
        registry.register(Arc::new(Named("plain"))).unwrap();

        assert!(registry.get("s3").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.descriptor("s3").unwrap().description, "test agent");
        assert!(registry.tools("s3").is_some());
        assert!(registry.tools("plain").is_none());
    }
}
