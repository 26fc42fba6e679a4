use crate::auth::auth::{AuthUser, bearer_token};
use crate::config::Config;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};
use serde_json::json;

/// Rejects requests without a valid access token and stores the caller as
/// an [`AuthUser`] request extension.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?
        .clone();

    let token = match bearer_token(req.request()) {
        Some(t) => t.to_string(),
        None => {
            let resp = HttpResponse::Unauthorized()
                .json(json!({"message": "Missing or malformed Authorization header"}));
            return Ok(req.into_response(resp.map_into_boxed_body()));
        }
    };

    let auth_user = match AuthUser::from_access_token(&token, &config.jwt_secret) {
        Ok(user) => user,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            let resp = HttpResponse::Unauthorized().json(json!({"message": e.to_string()}));
            return Ok(req.into_response(resp.map_into_boxed_body()));
        }
    };

    req.extensions_mut().insert(auth_user);

    next.call(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{TokenSubject, generate_access_token, generate_refresh_token};
    use crate::auth::rbac::Module;
    use crate::error::ApiResult;
    use actix_web::{App, http::StatusCode, middleware::from_fn, test, web};

    async fn whoami(user: AuthUser) -> ApiResult<HttpResponse> {
        Ok(HttpResponse::Ok().json(json!({ "email": user.email, "org_id": user.org_id })))
    }

    async fn manage_billing(user: AuthUser) -> ApiResult<HttpResponse> {
        user.require_manage(Module::Billing)?;
        Ok(HttpResponse::Ok().finish())
    }

    fn subject(role: u8) -> TokenSubject {
        TokenSubject {
            user_id: 5,
            email: "admin@acme.test".into(),
            role,
            org_id: Some(3),
            employee_id: None,
        }
    }

    macro_rules! app {
        ($config:expr) => {
            test::init_service(
                App::new().app_data(Data::new($config)).service(
                    web::scope("/api")
                        .wrap(from_fn(auth_middleware))
                        .route("/whoami", web::get().to(whoami))
                        .route("/billing", web::post().to(manage_billing)),
                ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn missing_header_is_unauthorized() {
        let app = app!(Config::for_tests());
        let req = test::TestRequest::get().uri("/api/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn access_token_reaches_handler() {
        let config = Config::for_tests();
        let token = generate_access_token(&subject(2), &config.jwt_secret, 60).unwrap();
        let app = app!(config);

        let req = test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["email"], "admin@acme.test");
        assert_eq!(body["org_id"], 3);
    }

    #[actix_web::test]
    async fn refresh_token_cannot_call_the_api() {
        let config = Config::for_tests();
        let (token, _) = generate_refresh_token(&subject(2), &config.jwt_secret, 60).unwrap();
        let app = app!(config);

        let req = test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn module_gate_returns_forbidden() {
        let config = Config::for_tests();
        let hr_token = generate_access_token(&subject(3), &config.jwt_secret, 60).unwrap();
        let admin_token = generate_access_token(&subject(2), &config.jwt_secret, 60).unwrap();
        let app = app!(config);

        let req = test::TestRequest::post()
            .uri("/api/billing")
            .insert_header(("Authorization", format!("Bearer {hr_token}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/billing")
            .insert_header(("Authorization", format!("Bearer {admin_token}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn unknown_role_is_rejected() {
        let config = Config::for_tests();
        let token = generate_access_token(&subject(42), &config.jwt_secret, 60).unwrap();
        let app = app!(config);

        let req = test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
