//! Typed id newtypes for tenants, agents, tasks, steps, and workflows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed id wrappers keep tenant ids, agent ids, and task ids from being
/// swapped at call sites. They are opaque strings underneath — no UUID
/// enforcement, no format requirement. Ordering is plain lexicographic
/// byte order, which the orchestrator relies on for stable tie-breaks.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            /// Create a new id from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is the empty string. An empty id is never
            /// valid; constructors accept it so that validation can happen
            /// at the operation boundary where a proper error is returned.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(TenantId, "Opaque isolation key scoping every limit, cache, and memory bound.");
typed_id!(AgentId, "Unique identifier for an agent.");
typed_id!(TaskId, "Unique identifier for a submitted task.");
typed_id!(StepId, "Unique identifier for a workflow step.");
typed_id!(WorkflowId, "Unique identifier for a workflow definition or execution.");
typed_id!(SessionId, "Unique identifier for a conversation session.");
typed_id!(ProviderId, "Identifier for a model provider (circuit-breaker scope).");
