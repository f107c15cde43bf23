// ABOUTME: The authenticated identity attached to a call after the request gate runs.

use crate::store::PrincipalType;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal_id: String,
    pub principal_type: PrincipalType,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Admin-gated RPCs and HTTP routes require `admin` or `owner`.
    pub fn is_admin(&self) -> bool {
        self.has_role("admin") || self.has_role("owner")
    }
}
