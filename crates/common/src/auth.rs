//! Principal identity carried on a connection. The authorization *decision*
//! lives in `gateway-hub` (it needs the agent-access resolver and the
//! channel model together); this module only defines the inputs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything the hub knows about the principal behind a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub workspace_ids: Vec<String>,
    pub is_admin: bool,
}

impl AuthContext {
    pub fn unauthenticated() -> Self {
        Self { user_id: None, workspace_ids: Vec::new(), is_admin: false }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Resolves whether a principal may act on behalf of a given agent.
/// `agent:*` channels must go through this even for URL-embedded
/// subscriptions registered at upgrade time - there is no bypass.
#[async_trait]
pub trait AgentAccessResolver: Send + Sync {
    async fn can_access_agent(&self, auth: &AuthContext, agent_id: &str) -> bool;
}

/// A resolver that denies every agent; used when the caller has none wired
/// up, so agent channels fail closed rather than open.
pub struct NoAgentAccess;

#[async_trait]
impl AgentAccessResolver for NoAgentAccess {
    async fn can_access_agent(&self, _auth: &AuthContext, _agent_id: &str) -> bool {
        false
    }
}
