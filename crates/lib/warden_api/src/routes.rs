//! Route paths, named `<METHOD>_<PATH>`.

pub const POST_AUTH_LOGIN: &str = "/auth/login";
pub const GET_AUTH_STATUS: &str = "/auth/status";
pub const POST_AUTH_PASSWORD_RESET: &str = "/auth/password-reset";

pub const ME: &str = "/me";
pub const POST_ME_PASSWORD: &str = "/me/password";

pub const ADMIN_USERS: &str = "/admin/users";
pub const DELETE_ADMIN_USERS_ID: &str = "/admin/users/{id}";
pub const GET_ADMIN_ROLES: &str = "/admin/roles";
pub const POST_ADMIN_USERS_ID_GRANT: &str = "/admin/users/{id}/grant";
pub const POST_ADMIN_USERS_ID_REVOKE: &str = "/admin/users/{id}/revoke";
pub const POST_ADMIN_USERS_ID_RESET_PASSWORD: &str = "/admin/users/{id}/reset-password";
pub const POST_ADMIN_USERS_ID_RESET_TOKEN: &str = "/admin/users/{id}/reset-token";
pub const GET_ADMIN_USERS_ID_LOGINS: &str = "/admin/users/{id}/logins";
