//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use super::jwt::JwtManager;
use super::ROLE_ADMIN;
use crate::error::ApiError;

/// Authenticated user extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(String::from)
}

/// Verify the bearer token and attach an [`AuthUser`] extension.
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let claims = auth.jwt_manager.verify_token(&token)?;
    let user = AuthUser {
        user_id: claims.user_id()?,
        role: claims.role,
        email: claims.email,
    };

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Reject non-admin callers. Must run inside `require_auth`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    if !user.is_admin() {
        tracing::warn!(
            user_id = %user.user_id,
            role = %user.role,
            "Non-admin attempted admin route"
        );
        return Err(ApiError::Forbidden("admin role required".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROLE_ADMIN, ROLE_STUDENT};
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    fn jwt_manager() -> JwtManager {
        JwtManager::new("0123456789abcdef0123456789abcdef", 24)
    }

    async fn whoami(Extension(user): Extension<AuthUser>) -> String {
        format!("{}:{}", user.user_id, user.role)
    }

    fn authed_app() -> Router {
        let auth_state = AuthState {
            jwt_manager: jwt_manager(),
        };
        Router::new()
            .route("/me", get(whoami))
            .layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    fn admin_app() -> Router {
        let auth_state = AuthState {
            jwt_manager: jwt_manager(),
        };
        Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(middleware::from_fn(require_admin))
            .layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    fn bearer(role: &str) -> String {
        let token = jwt_manager()
            .generate_token(Uuid::new_v4(), role, None)
            .unwrap();
        format!("Bearer {}", token)
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let response = authed_app()
            .oneshot(HttpRequest::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let response = authed_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, bearer(ROLE_STUDENT))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_token_is_unauthorized() {
        let response = authed_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, "Bearer garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_unauthorized() {
        let response = authed_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_student_forbidden_on_admin_route() {
        let response = admin_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/admin")
                    .header(AUTHORIZATION, bearer(ROLE_STUDENT))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_allowed_on_admin_route() {
        let response = admin_app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/admin")
                    .header(AUTHORIZATION, bearer(ROLE_ADMIN))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
