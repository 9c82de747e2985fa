//! Pure subscribe/publish authorization. Never raises: every call
//! returns `Allowed` or `Denied { reason }`.

use gateway_common::{AgentAccessResolver, AuthContext, Channel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied { reason: String },
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allowed)
    }

    fn denied(reason: impl Into<String>) -> Self {
        AuthDecision::Denied { reason: reason.into() }
    }
}

/// Intent being authorized. Publish is effectively restricted to internal
/// callers (the hub publishes on behalf of services) but mirrors
/// subscribe's rule shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Subscribe,
    Publish,
}

/// Evaluates `(auth, channel)` per the closed rule table. Agent
/// channels always consult `resolver`, including for URL-embedded
/// subscriptions registered at upgrade time - there is no bypass.
pub async fn authorize(
    auth: &AuthContext,
    channel: &Channel,
    intent: Intent,
    resolver: &dyn AgentAccessResolver,
) -> AuthDecision {
    if !auth.is_authenticated() {
        return AuthDecision::denied("unauthenticated");
    }
    if auth.is_admin {
        return AuthDecision::Allowed;
    }

    match channel {
        Channel::Agent { agent_id, .. } => {
            if resolver.can_access_agent(auth, agent_id).await {
                AuthDecision::Allowed
            } else {
                AuthDecision::denied(format!("no access to agent {agent_id}"))
            }
        }
        Channel::Workspace { workspace_id, .. } => {
            if auth.workspace_ids.iter().any(|w| w == workspace_id) {
                AuthDecision::Allowed
            } else {
                AuthDecision::denied(format!("not a member of workspace {workspace_id}"))
            }
        }
        Channel::User { user_id, .. } => {
            if auth.user_id.as_deref() == Some(user_id.as_str()) {
                AuthDecision::Allowed
            } else {
                AuthDecision::denied("not the owning user")
            }
        }
        Channel::System { .. } => match intent {
            Intent::Subscribe => AuthDecision::Allowed,
            Intent::Publish => AuthDecision::denied("system channel mutation requires admin"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::NoAgentAccess;

    fn auth(user: Option<&str>, workspaces: &[&str], admin: bool) -> AuthContext {
        AuthContext {
            user_id: user.map(str::to_string),
            workspace_ids: workspaces.iter().map(|s| s.to_string()).collect(),
            is_admin: admin,
        }
    }

    #[tokio::test]
    async fn unauthenticated_denied_for_everything() {
        let a = AuthContext::unauthenticated();
        let ch = Channel::parse("system:health").unwrap();
        let d = authorize(&a, &ch, Intent::Subscribe, &NoAgentAccess).await;
        assert!(!d.is_allowed());
    }

    #[tokio::test]
    async fn admin_allowed_everywhere() {
        let a = auth(Some("u1"), &[], true);
        let ch = Channel::parse("agent:output:a1").unwrap();
        let d = authorize(&a, &ch, Intent::Subscribe, &NoAgentAccess).await;
        assert!(d.is_allowed());
    }

    #[tokio::test]
    async fn agent_channel_requires_resolver_allow() {
        let a = auth(Some("u1"), &[], false);
        let ch = Channel::parse("agent:output:a1").unwrap();
        let d = authorize(&a, &ch, Intent::Subscribe, &NoAgentAccess).await;
        assert!(!d.is_allowed());
    }

    #[tokio::test]
    async fn workspace_channel_requires_membership() {
        let a = auth(Some("u1"), &["w1"], false);
        let ok = Channel::parse("workspace:reservations:w1").unwrap();
        let no = Channel::parse("workspace:reservations:w2").unwrap();
        assert!(authorize(&a, &ok, Intent::Subscribe, &NoAgentAccess).await.is_allowed());
        assert!(!authorize(&a, &no, Intent::Subscribe, &NoAgentAccess).await.is_allowed());
    }

    #[tokio::test]
    async fn user_channel_requires_self() {
        let a = auth(Some("u1"), &[], false);
        let ok = Channel::parse("user:mail:u1").unwrap();
        let no = Channel::parse("user:mail:u2").unwrap();
        assert!(authorize(&a, &ok, Intent::Subscribe, &NoAgentAccess).await.is_allowed());
        assert!(!authorize(&a, &no, Intent::Subscribe, &NoAgentAccess).await.is_allowed());
    }

    #[tokio::test]
    async fn system_channel_publish_requires_admin() {
        let a = auth(Some("u1"), &[], false);
        let ch = Channel::parse("system:maintenance").unwrap();
        assert!(authorize(&a, &ch, Intent::Subscribe, &NoAgentAccess).await.is_allowed());
        assert!(!authorize(&a, &ch, Intent::Publish, &NoAgentAccess).await.is_allowed());
    }
}
