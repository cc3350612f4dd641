use thiserror::Error;

/// Failures raised by a [`crate::store::Store`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Everything an inbound event can fail with. Each variant is reported to the
/// originating connection only.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Not authorized: {0}")]
    Unauthorized(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Could not verify group membership")]
    MembershipLookup(#[source] StoreError),
    #[error("Failed to save message")]
    Persistence(#[source] StoreError),
    #[error("Message sent, but notifying group members failed")]
    FanoutDegraded(#[source] StoreError),
    #[error("Too many pending events, slow down")]
    Overloaded,
}

impl HubError {
    pub fn not_a_member(group_id: &str) -> Self {
        HubError::Unauthorized(format!("you are not a member of group {group_id}"))
    }

    pub fn bound_elsewhere() -> Self {
        HubError::Unauthorized("connection is already bound to another user".into())
    }

    /// Degraded fanout is surfaced as a warning, not an error: the message
    /// itself was delivered.
    pub fn is_warning(&self) -> bool {
        matches!(self, HubError::FanoutDegraded(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HubError::Unauthorized(_) => "authorization",
            HubError::Validation(_) => "validation",
            HubError::MembershipLookup(_) => "membership_lookup",
            HubError::Persistence(_) => "persistence",
            HubError::FanoutDegraded(_) => "fanout_degraded",
            HubError::Overloaded => "overloaded",
        }
    }
}
