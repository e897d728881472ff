#![deny(missing_docs)]
//! Agent registry and message routing.
//!
//! The manager holds the sole owning reference to each agent; everything
//! else refers to agents by id and resolves through here. Message
//! delivery is best-effort and at-most-once: a full inbox drops its
//! oldest message, and the drop is surfaced as a [`Delivery::Dropped`]
//! event rather than hidden.

use cortex_agent::Agent;
use cortex_types::{AgentId, Component, Error, ErrorKind, Message, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What happened to a routed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Enqueued with room to spare.
    Delivered,
    /// Enqueued, but the receiver's inbox was full and this message was
    /// displaced to make room.
    Dropped(Message),
}

/// Registry of agents with capability lookup and message routing.
///
/// Readers-writers with short critical sections: the map lock is held
/// only for lookup/insert, never across agent execution.
pub struct Manager {
    agents: RwLock<HashMap<AgentId, Arc<Agent>>>,
}

impl Manager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent. Replaces any agent with the same id and
    /// returns the replaced one.
    pub fn register(&self, agent: Arc<Agent>) -> Option<Arc<Agent>> {
        let id = agent.id().clone();
        tracing::debug!(agent = %id, tenant = %agent.tenant(), "agent registered");
        self.agents
            .write()
            .expect("manager registry lock")
            .insert(id, agent)
    }

    /// Remove an agent. Returns it so callers can drain its inbox.
    pub fn unregister(&self, id: &AgentId) -> Option<Arc<Agent>> {
        let removed = self
            .agents
            .write()
            .expect("manager registry lock")
            .remove(id);
        if removed.is_some() {
            tracing::debug!(agent = %id, "agent unregistered");
        }
        removed
    }

    /// Look up an agent by id.
    pub fn get(&self, id: &AgentId) -> Result<Arc<Agent>, Error> {
        self.agents
            .read()
            .expect("manager registry lock")
            .get(id)
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::UnknownAgent,
                    Component::Manager,
                    format!("no agent registered as `{id}`"),
                )
            })
    }

    /// All agents advertising `capability`, in id order (stable for
    /// callers that pick "the first match").
    pub fn find_by_capability(&self, capability: &str) -> Vec<Arc<Agent>> {
        let agents = self.agents.read().expect("manager registry lock");
        let mut matches: Vec<Arc<Agent>> = agents
            .values()
            .filter(|a| a.has_capability(capability))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id().cmp(b.id()));
        matches
    }

    /// All agents belonging to `tenant`, in id order.
    pub fn agents_for_tenant(&self, tenant: &TenantId) -> Vec<Arc<Agent>> {
        let agents = self.agents.read().expect("manager registry lock");
        let mut matches: Vec<Arc<Agent>> = agents
            .values()
            .filter(|a| a.tenant() == tenant)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id().cmp(b.id()));
        matches
    }

    /// Registered agent ids, sorted.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .agents
            .read()
            .expect("manager registry lock")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Route a message to its `to` agent. At-most-once: delivery into a
    /// full inbox displaces the oldest message, reported as
    /// [`Delivery::Dropped`].
    pub fn send(&self, message: Message) -> Result<Delivery, Error> {
        let target = self.get(&message.to)?;
        match target.deliver(message) {
            None => Ok(Delivery::Delivered),
            Some(dropped) => {
                tracing::warn!(
                    agent = %dropped.to,
                    kind = %dropped.kind,
                    "inbox overflow, oldest message dropped"
                );
                Ok(Delivery::Dropped(dropped))
            }
        }
    }

    /// Send `message` from one agent to every other registered agent of
    /// the same tenant. Returns one delivery report per recipient, in id
    /// order.
    pub fn broadcast_from(
        &self,
        from: &AgentId,
        kind: &str,
        body: serde_json::Value,
    ) -> Result<Vec<(AgentId, Delivery)>, Error> {
        let sender = self.get(from)?;
        let recipients = self.agents_for_tenant(sender.tenant());
        let mut reports = Vec::new();
        for recipient in recipients {
            if recipient.id() == from {
                continue;
            }
            let message = Message::new(from.clone(), recipient.id().clone(), kind, body.clone());
            match recipient.deliver(message) {
                None => reports.push((recipient.id().clone(), Delivery::Delivered)),
                Some(dropped) => {
                    reports.push((recipient.id().clone(), Delivery::Dropped(dropped)))
                }
            }
        }
        Ok(reports)
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_agent::AgentConfig;
    use cortex_gateway::{
        EmbedRequest, GenerateRequest, GenerateResponse, ModelGateway,
    };
    use cortex_types::{CallContext, Capability};
    use serde_json::json;

    struct NullGateway;

    #[async_trait]
    impl ModelGateway for NullGateway {
        async fn generate(
            &self,
            _request: GenerateRequest,
            _ctx: &CallContext,
        ) -> Result<GenerateResponse, Error> {
            Err(Error::new(
                ErrorKind::ProviderUnavailable,
                Component::Gateway,
                "null gateway",
            ))
        }

        async fn embed(
            &self,
            _request: EmbedRequest,
            _ctx: &CallContext,
        ) -> Result<Vec<Vec<f32>>, Error> {
            Ok(vec![])
        }
    }

    fn make_agent(id: &str, tenant: &str, capability: Option<&str>) -> Arc<Agent> {
        let mut config = AgentConfig::new(id, tenant, "m-fast");
        if let Some(name) = capability {
            config = config.with_capability(Capability::new(name, "test capability"));
        }
        config.inbox_bound = 2;
        Arc::new(Agent::new(config, Arc::new(NullGateway)))
    }

    #[test]
    fn register_get_unregister() {
        let manager = Manager::new();
        manager.register(make_agent("a1", "t1", None));
        assert!(manager.get(&AgentId::new("a1")).is_ok());

        let err = manager.get(&AgentId::new("missing")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownAgent);

        manager.unregister(&AgentId::new("a1"));
        assert!(manager.get(&AgentId::new("a1")).is_err());
    }

    #[test]
    fn register_replaces_same_id() {
        let manager = Manager::new();
        assert!(manager.register(make_agent("a1", "t1", None)).is_none());
        let replaced = manager.register(make_agent("a1", "t1", None));
        assert!(replaced.is_some());
        assert_eq!(manager.agent_ids().len(), 1);
    }

    #[test]
    fn capability_lookup_is_stable() {
        let manager = Manager::new();
        manager.register(make_agent("b", "t1", Some("summarize")));
        manager.register(make_agent("a", "t1", Some("summarize")));
        manager.register(make_agent("c", "t1", Some("translate")));

        let found = manager.find_by_capability("summarize");
        let ids: Vec<&str> = found.iter().map(|a| a.id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(manager.find_by_capability("unknown").is_empty());
    }

    #[test]
    fn send_routes_to_target_inbox() {
        let manager = Manager::new();
        manager.register(make_agent("a1", "t1", None));
        manager.register(make_agent("a2", "t1", None));

        let delivery = manager
            .send(Message::new("a1", "a2", "ping", json!({})))
            .unwrap();
        assert_eq!(delivery, Delivery::Delivered);

        let a2 = manager.get(&AgentId::new("a2")).unwrap();
        let messages = a2.take_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, "ping");
    }

    #[test]
    fn send_to_unknown_agent_fails() {
        let manager = Manager::new();
        let err = manager
            .send(Message::new("a1", "ghost", "ping", json!({})))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownAgent);
    }

    #[test]
    fn overflow_surfaces_dropped_message() {
        let manager = Manager::new();
        manager.register(make_agent("a1", "t1", None));
        manager.register(make_agent("a2", "t1", None));

        // Inbox bound is 2; the third delivery displaces the first.
        for i in 0..2 {
            let d = manager
                .send(Message::new("a1", "a2", "n", json!(i)))
                .unwrap();
            assert_eq!(d, Delivery::Delivered);
        }
        match manager.send(Message::new("a1", "a2", "n", json!(2))).unwrap() {
            Delivery::Dropped(old) => assert_eq!(old.body, json!(0)),
            Delivery::Delivered => panic!("expected a drop"),
        }
    }

    #[test]
    fn broadcast_reaches_same_tenant_only() {
        let manager = Manager::new();
        manager.register(make_agent("a1", "t1", None));
        manager.register(make_agent("a2", "t1", None));
        manager.register(make_agent("a3", "t1", None));
        manager.register(make_agent("other", "t2", None));

        let reports = manager
            .broadcast_from(&AgentId::new("a1"), "announce", json!({"v": 1}))
            .unwrap();
        let ids: Vec<&str> = reports.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a3"]);

        let other = manager.get(&AgentId::new("other")).unwrap();
        assert!(other.take_messages().is_empty());
    }
}
