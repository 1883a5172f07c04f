// Authentication and role lookup
//
// Callers present a bearer JWT whose subject is their user id. Role names are
// resolved per request through a `RoleDirectory`.

pub mod jwt;
pub mod middleware;
pub mod rbac;

pub use middleware::AuthUser;
pub use rbac::{AdminPolicy, MemoryRoleDirectory, PgRoleDirectory, Principal, RoleDirectory};
