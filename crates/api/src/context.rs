use bastion_auth::Identity;
use bastion_core::SessionId;

/// Login session for a request, resolved by the session middleware.
///
/// Always present in request extensions; anonymous requests carry an empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    session_id: Option<SessionId>,
    identity: Option<Identity>,
}

impl SessionContext {
    pub fn new(session_id: SessionId, identity: Identity) -> Self {
        Self {
            session_id: Some(session_id),
            identity: Some(identity),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// Identity admitted by the access guard for a protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentIdentity(pub Identity);

impl CurrentIdentity {
    pub fn identity(&self) -> &Identity {
        &self.0
    }
}

/// Response marker: commit the identity store before this response leaves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PendingCommit;
