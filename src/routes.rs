use crate::{
    api::{attendance, audit_log, billing, demo_request, department, employee, leave_request, organization, shift},
    auth::{handlers, middleware::auth_middleware, signup},
    config::Config,
    integrations::cloudinary::MAX_DATA_URI_LEN,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Result, anyhow};
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Result<Governor<PeerIpKeyExtractor, NoOpMiddleware>> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid rate limit: {requests_per_min}/min"))?;
    Ok(Governor::new(&cfg))
}

/// Rate limiters are built once so every worker shares the same buckets.
#[derive(Clone)]
pub struct Limiters {
    login: Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>,
    signup: Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>,
    refresh: Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>,
    protected: Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>,
}

impl Limiters {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            login: Arc::new(build_limiter(config.rate_login_per_min)?),
            signup: Arc::new(build_limiter(config.rate_signup_per_min)?),
            refresh: Arc::new(build_limiter(config.rate_refresh_per_min)?),
            protected: Arc::new(build_limiter(config.rate_protected_per_min)?),
        })
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/login/2fa")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login_two_factor)),
            )
            .service(
                web::resource("/google")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::google_login)),
            )
            .service(
                web::resource("/signup")
                    .wrap(limiters.signup.clone())
                    .route(web::post().to(signup::signup)),
            )
            .service(
                web::resource("/org-code/{code}")
                    .wrap(limiters.signup.clone())
                    .route(web::get().to(handlers::org_code_available)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(limiters.refresh.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    cfg.service(
        web::scope("/billing")
            .service(web::resource("/plans").route(web::get().to(billing::list_plans)))
            // PayMongo retries on its own schedule; no limiter
            .service(web::resource("/webhook").route(web::post().to(billing::webhook))),
    );

    cfg.service(
        web::resource("/demo-requests")
            .wrap(limiters.signup.clone())
            .route(web::post().to(demo_request::create_demo_request)),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(limiters.protected.clone()) // rate limiting
            .service(web::resource("/me").route(web::get().to(handlers::me)))
            .service(web::resource("/me/modules").route(web::get().to(handlers::my_modules)))
            .service(
                web::scope("/2fa")
                    .route("/setup", web::post().to(handlers::totp_setup))
                    .route("/enable", web::post().to(handlers::totp_enable))
                    .route("/disable", web::post().to(handlers::totp_disable)),
            )
            .service(
                web::resource("/organization")
                    .route(web::get().to(organization::get_organization))
                    .route(web::put().to(organization::update_organization)),
            )
            .service(
                web::scope("/departments")
                    .service(
                        web::resource("")
                            .route(web::post().to(department::create_department))
                            .route(web::get().to(department::list_departments)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(department::get_department))
                            .route(web::put().to(department::update_department))
                            .route(web::delete().to(department::delete_department)),
                    ),
            )
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(employee::get_employee))
                            .route(web::patch().to(employee::update_employee))
                            .route(web::put().to(employee::update_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    )
                    .service(
                        web::resource("/{id}/photo")
                            .app_data(web::JsonConfig::default().limit(MAX_DATA_URI_LEN + 1024))
                            .route(web::post().to(employee::upload_photo)),
                    )
                    .service(web::resource("/{id}/account").route(web::post().to(employee::create_account))),
            )
            .service(
                web::scope("/leave")
                    // /leave
                    .service(
                        web::resource("")
                            .route(web::get().to(leave_request::list_leave_requests))
                            .route(web::post().to(leave_request::create_leave_request)),
                    )
                    // /leave/{id}
                    .service(web::resource("/{id}").route(web::get().to(leave_request::get_leave_request)))
                    .service(
                        web::resource("/{id}/approve").route(web::put().to(leave_request::approve_leave_request)),
                    )
                    .service(
                        web::resource("/{id}/decline").route(web::put().to(leave_request::decline_leave_request)),
                    )
                    .service(
                        web::resource("/{id}/cancel").route(web::put().to(leave_request::cancel_leave_request)),
                    ),
            )
            .service(
                web::scope("/shifts")
                    .service(
                        web::resource("/schedules")
                            .route(web::post().to(shift::create_schedule))
                            .route(web::get().to(shift::list_schedules)),
                    )
                    .service(web::resource("/schedules/{id}").route(web::delete().to(shift::delete_schedule)))
                    .service(
                        web::resource("/assignments")
                            .route(web::post().to(shift::create_assignment))
                            .route(web::get().to(shift::list_assignments)),
                    )
                    .service(web::resource("/assignments/{id}").route(web::delete().to(shift::delete_assignment))),
            )
            .service(
                web::scope("/attendance")
                    .service(web::resource("").route(web::get().to(attendance::list_attendance)))
                    .service(web::resource("/check-in").route(web::post().to(attendance::check_in)))
                    .service(web::resource("/check-out").route(web::post().to(attendance::check_out))),
            )
            .service(
                web::scope("/billing")
                    .service(web::resource("/subscription").route(web::get().to(billing::get_subscription)))
                    .service(web::resource("/checkout").route(web::post().to(billing::create_checkout)))
                    .service(
                        web::resource("/subscription/cancel").route(web::post().to(billing::cancel_subscription)),
                    ),
            )
            .service(web::resource("/audit-logs").route(web::get().to(audit_log::list_audit_logs)))
            .service(
                web::scope("/platform")
                    .service(web::resource("/organizations").route(web::get().to(organization::list_organizations)))
                    .service(
                        web::resource("/organizations/{id}/status")
                            .route(web::put().to(organization::set_organization_status)),
                    )
                    .service(web::resource("/plans").route(web::post().to(billing::create_plan)))
                    .service(
                        web::resource("/demo-requests").route(web::get().to(demo_request::list_demo_requests)),
                    )
                    .service(
                        web::resource("/demo-requests/{id}/status")
                            .route(web::put().to(demo_request::set_demo_request_status)),
                    ),
            ),
    );
}

// LOGIN
//  ├─ authenticated       → access_token (15 min) + refresh_token (7 days)
//  ├─ two_factor_required → POST /auth/login/2fa with challenge_token + TOTP code
//  └─ payment_pending     → 402 + checkout_url

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns a new token pair, old refresh token revoked

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiters_accept_zero_and_high_rates() {
        assert!(build_limiter(0).is_ok());
        assert!(build_limiter(100_000).is_ok());
    }
}
