pub mod auth;
pub mod flow;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod rbac;
pub mod signup;
pub mod totp;
