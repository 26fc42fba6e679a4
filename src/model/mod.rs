pub mod attendance;
pub mod audit_log;
pub mod demo_request;
pub mod department;
pub mod employee;
pub mod leave_request;
pub mod organization;
pub mod plan;
pub mod shift;
pub mod subscription;
pub mod user;
