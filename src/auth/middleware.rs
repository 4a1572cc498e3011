use actix_web::FromRequest;
use actix_web::{Error, HttpRequest, dev::Payload, web};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::TokenVerifier;

/// Identity taken from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

pub struct AuthenticatedUser(pub AuthUser);

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();

        Box::pin(async move {
            // 1. Extract the Bearer token from the Authorization header.
            let auth_header = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    actix_web::error::ErrorUnauthorized("Missing Authorization header")
                })?;

            let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
                actix_web::error::ErrorUnauthorized("Authorization header must be: Bearer <token>")
            })?;

            // 2. Get the verifier from app data.
            let verifier = req
                .app_data::<web::Data<Arc<TokenVerifier>>>()
                .ok_or_else(|| {
                    actix_web::error::ErrorInternalServerError("Token verifier not configured")
                })?;

            // 3. Validate the JWT.
            let claims = verifier
                .verify(token)
                .await
                .map_err(|e| actix_web::error::ErrorUnauthorized(format!("Invalid token: {e}")))?;

            let id = claims
                .user_id()
                .map_err(actix_web::error::ErrorUnauthorized)?;

            Ok(AuthenticatedUser(AuthUser {
                id,
                email: claims.user_email(),
                display_name: claims.display_name(),
            }))
        })
    }
}
