/// How the caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Jwt,
    ApiKey,
}

/// The authenticated caller: resolved user record plus grant sets.
///
/// `roles` are checked with require-any semantics, `permissions` with
/// require-all; the `admin` role implies every permission.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub method: AuthMethod,
    /// JWT id, present for token auth so logout can revoke it.
    pub jti: Option<String>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }

    /// Require-any: at least one of `required` (admins always pass).
    pub fn has_any_role(&self, required: &[String]) -> bool {
        if required.is_empty() || self.is_admin() {
            return true;
        }
        required.iter().any(|r| self.roles.contains(r))
    }

    /// Require-all: every one of `required` (admins and a literal `*` grant
    /// always pass).
    pub fn has_all_permissions(&self, required: &[String]) -> bool {
        if required.is_empty() || self.is_admin() {
            return true;
        }
        if self.permissions.iter().any(|p| p == "*") {
            return true;
        }
        required.iter().all(|p| self.permissions.contains(p))
    }
}
