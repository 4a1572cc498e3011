use actix_web::{HttpResponse, Responder, web};

use crate::auth::middleware::AuthenticatedUser;
use crate::db::reputation::get_reputation;
use crate::models::reputation::AccountSummary;
use crate::store::StoreData;

/// GET|POST /api/ping: liveness check.
pub async fn ping() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// GET /api/account: the caller's reputation summary.
pub async fn account(user: AuthenticatedUser, store: web::Data<StoreData>) -> impl Responder {
    match get_reputation(store.get_ref().as_ref(), user.0.id).await {
        Ok(reputation) => {
            let mut summary = AccountSummary::from(reputation);
            summary.email = user.0.email;
            summary.display_name = user.0.display_name;
            HttpResponse::Ok().json(summary)
        }
        Err(e) => e.to_response(),
    }
}
