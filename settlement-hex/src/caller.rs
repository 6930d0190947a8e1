//! Authenticated caller identity attached to each request.

/// Role that unlocks reconciliation endpoints and cross-account reads.
pub const OPERATOR_ROLE: &str = "operator";

/// Identity established by the auth middleware from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Identity-provider subject (`sub` claim)
    pub subject: String,
    pub roles: Vec<String>,
}

impl Caller {
    pub fn new(subject: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            roles,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.roles.iter().any(|r| r == OPERATOR_ROLE)
    }
}
