//! Authentication module for the StudiMed API

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{require_admin, require_auth, AuthState, AuthUser};

/// Role string carried in JWT claims for back-office users.
pub const ROLE_ADMIN: &str = "admin";
/// Role string for regular platform users.
pub const ROLE_STUDENT: &str = "student";
