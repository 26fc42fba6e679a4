use crate::api::{
    attendance::CheckInRequest,
    billing::{CheckoutBody, CreatePlan},
    demo_request::{CreateDemoRequest, SetDemoRequestStatus},
    department::DepartmentPayload,
    employee::{AccountRole, CreateAccount, CreateEmployee, PhotoUpload, UpdateEmployee},
    leave_request::CreateLeaveRequest,
    organization::{SetOrganizationStatus, UpdateOrganization},
    shift::{CreateAssignment, CreateSchedule},
};
use crate::auth::{
    handlers::{
        GoogleLoginRequest, LoginRequest, LoginResponse, MeResponse, TotpCodeRequest, TotpSetupResponse,
        TwoFactorLoginRequest,
    },
    rbac::{Access, Module, ModuleAccess, Role},
    signup::{SignupRequest, SignupResponse},
};
use crate::model::{
    attendance::Attendance,
    audit_log::AuditLog,
    demo_request::{DemoRequest, DemoRequestStatus},
    department::Department,
    employee::{Employee, EmployeeStatus},
    leave_request::{LeaveRequest, LeaveStatus, LeaveType},
    organization::{OrgStatus, Organization},
    plan::Plan,
    shift::{ShiftAssignment, ShiftSchedule},
    subscription::Subscription,
};
use crate::utils::pagination::{
    AssignmentPage, AttendancePage, AuditLogPage, DemoRequestPage, EmployeePage, LeavePage, OrganizationPage,
};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM SaaS API",
        version = "1.0.0",
        description = r#"
## Multi-tenant HR & Attendance Platform

Every organization (tenant) signs up with its own code, picks a plan and
manages its people in isolation from every other tenant.

### 🔹 Key Features
- **Organizations & Billing**
  - Self-service signup, PayMongo checkout, plan limits
- **Employee Management**
  - Departments, employee profiles, photos and employee logins
- **Leave Management**
  - Self-service requests, approve/decline/cancel
- **Shifts & Attendance**
  - Shift schedules and assignments, geotagged check-in and check-out
- **Platform Administration**
  - Tenant status, plans, demo requests, audit trail

### 🔐 Security
Protected endpoints take a **JWT Bearer** access token. Access to each
module is decided by the caller's role. Optional TOTP two-factor login.

### 📦 Response Format
- JSON everywhere; errors are `{"message": "..."}`
- Pagination supported for list endpoints

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::login_two_factor,
        crate::auth::handlers::google_login,
        crate::auth::handlers::org_code_available,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,
        crate::auth::handlers::my_modules,
        crate::auth::handlers::totp_setup,
        crate::auth::handlers::totp_enable,
        crate::auth::handlers::totp_disable,
        crate::auth::signup::signup,

        crate::api::organization::get_organization,
        crate::api::organization::update_organization,
        crate::api::organization::list_organizations,
        crate::api::organization::set_organization_status,

        crate::api::department::create_department,
        crate::api::department::list_departments,
        crate::api::department::get_department,
        crate::api::department::update_department,
        crate::api::department::delete_department,

        crate::api::employee::create_employee,
        crate::api::employee::list_employees,
        crate::api::employee::get_employee,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,
        crate::api::employee::upload_photo,
        crate::api::employee::create_account,

        crate::api::leave_request::create_leave_request,
        crate::api::leave_request::list_leave_requests,
        crate::api::leave_request::get_leave_request,
        crate::api::leave_request::approve_leave_request,
        crate::api::leave_request::decline_leave_request,
        crate::api::leave_request::cancel_leave_request,

        crate::api::shift::create_schedule,
        crate::api::shift::list_schedules,
        crate::api::shift::delete_schedule,
        crate::api::shift::create_assignment,
        crate::api::shift::list_assignments,
        crate::api::shift::delete_assignment,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::list_attendance,

        crate::api::billing::list_plans,
        crate::api::billing::create_plan,
        crate::api::billing::get_subscription,
        crate::api::billing::create_checkout,
        crate::api::billing::cancel_subscription,
        crate::api::billing::webhook,

        crate::api::audit_log::list_audit_logs,

        crate::api::demo_request::create_demo_request,
        crate::api::demo_request::list_demo_requests,
        crate::api::demo_request::set_demo_request_status
    ),
    components(
        schemas(
            LoginRequest,
            LoginResponse,
            TwoFactorLoginRequest,
            GoogleLoginRequest,
            MeResponse,
            TotpCodeRequest,
            TotpSetupResponse,
            SignupRequest,
            SignupResponse,
            Role,
            Module,
            Access,
            ModuleAccess,
            Organization,
            OrgStatus,
            UpdateOrganization,
            SetOrganizationStatus,
            Department,
            DepartmentPayload,
            Employee,
            EmployeeStatus,
            CreateEmployee,
            UpdateEmployee,
            PhotoUpload,
            CreateAccount,
            AccountRole,
            LeaveRequest,
            LeaveType,
            LeaveStatus,
            CreateLeaveRequest,
            ShiftSchedule,
            ShiftAssignment,
            CreateSchedule,
            CreateAssignment,
            Attendance,
            CheckInRequest,
            Plan,
            CreatePlan,
            Subscription,
            CheckoutBody,
            AuditLog,
            DemoRequest,
            DemoRequestStatus,
            CreateDemoRequest,
            SetDemoRequestStatus,
            EmployeePage,
            LeavePage,
            AttendancePage,
            AssignmentPage,
            AuditLogPage,
            OrganizationPage,
            DemoRequestPage
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, tokens, two-factor and signup"),
        (name = "Organization", description = "The caller's organization"),
        (name = "Platform", description = "Tenant administration"),
        (name = "Department", description = "Department management APIs"),
        (name = "Employee", description = "Employee management APIs"),
        (name = "Leave", description = "Leave management APIs"),
        (name = "Shift", description = "Shift schedules and assignments"),
        (name = "Attendance", description = "Attendance management APIs"),
        (name = "Billing", description = "Plans, subscriptions and PayMongo"),
        (name = "Audit", description = "Audit trail"),
        (name = "Demo", description = "Demo requests"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_protected_and_public_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/auth/login"));
        assert!(doc.paths.paths.contains_key("/api/leave/{id}/approve"));
        assert!(doc.paths.paths.contains_key("/billing/webhook"));
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
