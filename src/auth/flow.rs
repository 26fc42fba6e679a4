//! Decides what happens after the first login factor succeeds.

use crate::error::{ApiError, ApiResult};
use crate::model::organization::{OrgStatus, Organization};
use crate::model::user::User;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginDecision {
    /// Issue access and refresh tokens
    Authenticated,
    /// Ask for a TOTP code before issuing tokens
    TwoFactorRequired,
    /// Signup paid plan not settled yet; client should resume checkout
    PaymentPending { org_id: u64 },
    /// Account or organization cannot sign in
    Disabled(&'static str),
}

/// Checks run in order: user disabled, organization suspended or missing,
/// payment pending, second factor.
pub fn decide(user: &User, org: Option<&Organization>) -> LoginDecision {
    if !user.is_active {
        return LoginDecision::Disabled("Account is disabled");
    }

    if let Some(org_id) = user.org_id {
        match org.and_then(Organization::status) {
            Some(OrgStatus::Active) => {}
            Some(OrgStatus::PendingPayment) => return LoginDecision::PaymentPending { org_id },
            Some(OrgStatus::Suspended) => {
                return LoginDecision::Disabled("Organization is suspended");
            }
            None => return LoginDecision::Disabled("Organization not found"),
        }
    }

    if user.totp_enabled && user.totp_secret.is_some() {
        return LoginDecision::TwoFactorRequired;
    }

    LoginDecision::Authenticated
}

/// Gate for refresh token rotation. The session already passed its second
/// factor, so only account and organization state can stop it.
pub fn check_refresh(user: &User, org: Option<&Organization>) -> ApiResult<()> {
    match decide(user, org) {
        LoginDecision::Authenticated | LoginDecision::TwoFactorRequired => Ok(()),
        LoginDecision::PaymentPending { .. } => Err(ApiError::forbidden("Organization payment is pending")),
        LoginDecision::Disabled(reason) => Err(ApiError::forbidden(reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{ResponseError, http::StatusCode};
    use chrono::Utc;

    fn user() -> User {
        User {
            id: 1,
            org_id: Some(10),
            email: "a@acme.test".into(),
            password_hash: None,
            role_id: 2,
            employee_id: None,
            is_active: true,
            totp_secret: None,
            totp_enabled: false,
            google_subject: None,
            last_login_at: None,
        }
    }

    fn org(status: OrgStatus) -> Organization {
        Organization {
            id: 10,
            code: "acme".into(),
            name: "Acme".into(),
            email: "a@acme.test".into(),
            address: None,
            status: status.as_ref().to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn active_org_without_totp_authenticates() {
        assert_eq!(decide(&user(), Some(&org(OrgStatus::Active))), LoginDecision::Authenticated);
    }

    #[test]
    fn totp_enabled_requires_second_factor() {
        let u = User {
            totp_enabled: true,
            totp_secret: Some("JBSWY3DPEHPK3PXP".into()),
            ..user()
        };
        assert_eq!(decide(&u, Some(&org(OrgStatus::Active))), LoginDecision::TwoFactorRequired);
    }

    #[test]
    fn pending_payment_wins_over_totp() {
        let u = User {
            totp_enabled: true,
            totp_secret: Some("JBSWY3DPEHPK3PXP".into()),
            ..user()
        };
        assert_eq!(
            decide(&u, Some(&org(OrgStatus::PendingPayment))),
            LoginDecision::PaymentPending { org_id: 10 }
        );
    }

    #[test]
    fn disabled_user_wins_over_everything() {
        let u = User { is_active: false, ..user() };
        assert!(matches!(
            decide(&u, Some(&org(OrgStatus::PendingPayment))),
            LoginDecision::Disabled(_)
        ));
    }

    #[test]
    fn suspended_or_missing_org_blocks_login() {
        assert!(matches!(decide(&user(), Some(&org(OrgStatus::Suspended))), LoginDecision::Disabled(_)));
        assert!(matches!(decide(&user(), None), LoginDecision::Disabled(_)));
    }

    #[test]
    fn platform_admin_needs_no_org() {
        let u = User { org_id: None, role_id: 1, ..user() };
        assert_eq!(decide(&u, None), LoginDecision::Authenticated);
    }

    #[test]
    fn totp_flag_without_secret_is_ignored() {
        let u = User { totp_enabled: true, ..user() };
        assert_eq!(decide(&u, Some(&org(OrgStatus::Active))), LoginDecision::Authenticated);
    }

    #[test]
    fn refresh_is_refused_for_suspended_org() {
        let err = check_refresh(&user(), Some(&org(OrgStatus::Suspended))).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("suspended"));
    }

    #[test]
    fn refresh_is_refused_for_missing_org_or_pending_payment() {
        assert!(check_refresh(&user(), None).is_err());
        assert!(check_refresh(&user(), Some(&org(OrgStatus::PendingPayment))).is_err());
    }

    #[test]
    fn refresh_does_not_ask_for_a_second_factor_again() {
        let u = User {
            totp_enabled: true,
            totp_secret: Some("JBSWY3DPEHPK3PXP".into()),
            ..user()
        };
        assert!(check_refresh(&u, Some(&org(OrgStatus::Active))).is_ok());
    }

    #[test]
    fn refresh_is_refused_for_disabled_user() {
        let u = User { is_active: false, ..user() };
        assert!(check_refresh(&u, Some(&org(OrgStatus::Active))).is_err());
    }
}
