//! Request context: who is acting, under which correlation id.

use uuid::Uuid;

/// Identity and correlation data carried into every activity entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Actor performing the operation (user id or service name).
    pub actor: String,
    /// Transaction id shared by everything one inbound request does.
    pub correlation_id: Uuid,
}

impl RequestContext {
    /// Create a context with a freshly generated correlation id.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Builder: reuse an upstream correlation id.
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("system")
    }
}
