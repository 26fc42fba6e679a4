use crate::{
    auth::jwt::verify_token_of,
    auth::rbac::{self, Module, Role},
    config::Config,
    error::{ApiError, ApiResult},
    models::TokenType,
};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub email: String,
    pub role: Role,

    /// Absent only for platform admins
    pub org_id: Option<u64>,
    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl AuthUser {
    pub fn from_access_token(token: &str, secret: &str) -> ApiResult<Self> {
        let claims = verify_token_of(token, secret, TokenType::Access)?;
        let role = Role::from_id(claims.role).ok_or_else(|| ApiError::unauthorized("Invalid role"))?;

        Ok(AuthUser {
            user_id: claims.user_id,
            email: claims.sub,
            role,
            org_id: claims.org_id,
            employee_id: claims.employee_id,
        })
    }

    pub fn require_view(&self, module: Module) -> ApiResult<()> {
        if rbac::can_view(self.role, module) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("No access to {module}")))
        }
    }

    pub fn require_manage(&self, module: Module) -> ApiResult<()> {
        if rbac::can_manage(self.role, module) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!("Cannot manage {module}")))
        }
    }

    /// Tenant the caller belongs to.
    pub fn org_id(&self) -> ApiResult<u64> {
        self.org_id
            .ok_or_else(|| ApiError::forbidden("No organization bound to this account"))
    }

    pub fn own_employee_id(&self) -> ApiResult<u64> {
        self.employee_id
            .ok_or_else(|| ApiError::forbidden("No employee profile"))
    }

    /// Employees only ever see their own records in a module; everyone who
    /// can view the module beyond that gets `None`.
    pub fn self_scope(&self, module: Module) -> ApiResult<Option<u64>> {
        self.require_view(module)?;
        if self.role == Role::Employee {
            self.own_employee_id().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // set by auth_middleware on protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match bearer_token(req) {
            Some(t) => t,
            None => return ready(Err(ApiError::unauthorized("Missing token"))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => return ready(Err(ApiError::internal("Config missing"))),
        };

        ready(AuthUser::from_access_token(token, &config.jwt_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, employee_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            email: "u@acme.test".into(),
            role,
            org_id: Some(9),
            employee_id,
        }
    }

    #[test]
    fn employees_are_scoped_to_themselves() {
        let scope = user(Role::Employee, Some(33)).self_scope(Module::LeaveRequests).unwrap();
        assert_eq!(scope, Some(33));
    }

    #[test]
    fn employee_without_profile_is_forbidden() {
        assert!(user(Role::Employee, None).self_scope(Module::Attendance).is_err());
    }

    #[test]
    fn managers_see_everyone() {
        let scope = user(Role::Manager, Some(2)).self_scope(Module::LeaveRequests).unwrap();
        assert_eq!(scope, None);
    }

    #[test]
    fn self_scope_still_checks_the_module() {
        assert!(user(Role::Employee, Some(1)).self_scope(Module::Employees).is_err());
    }

    #[test]
    fn platform_admin_has_no_tenant() {
        let admin = AuthUser {
            org_id: None,
            ..user(Role::PlatformAdmin, None)
        };
        assert!(admin.org_id().is_err());
        assert!(admin.require_manage(Module::Platform).is_ok());
    }
}
