use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;

use crate::auth::middleware::AuthenticatedUser;
use crate::db::jobs as job_db;
use crate::error::ExchangeError;
use crate::geo::resolve_location;
use crate::matching::{GrabOutcome, GrabRequest, MatchingEngine};
use crate::models::ListQuery;
use crate::models::jobs::{GrabJobRequest, SignJob, SignJobResponse};
use crate::models::location::LocationType;
use crate::store::StoreData;

use super::GeocoderData;

/// POST /api/grab_job: match the calling provider to an open bid.
///
/// 200 with the job on a match, 204 when nothing suitable is open.
pub async fn grab_job(
    user: AuthenticatedUser,
    engine: web::Data<MatchingEngine>,
    geocoder: web::Data<GeocoderData>,
    body: web::Json<GrabJobRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let location_type = body.location_type.unwrap_or(LocationType::Remote);

    let location = if location_type.is_location_bound() {
        if body.location.is_empty() {
            return ExchangeError::Validation(
                "Location required for physical or hybrid providers".into(),
            )
            .to_response();
        }
        match resolve_location(geocoder.get_ref().as_ref(), &body.location).await {
            Ok(found) => found,
            Err(e) => return e.to_response(),
        }
    } else {
        None
    };

    let request = GrabRequest {
        seat: body.seat,
        provider_id: user.0.id,
        capabilities: body.capabilities,
        location_type,
        location,
        max_distance: body.max_distance,
    };

    match engine.grab_job(request).await {
        Ok(GrabOutcome::Matched(job)) => HttpResponse::Ok().json(job),
        Ok(GrabOutcome::NoMatch) => HttpResponse::NoContent().finish(),
        Err(e) => e.to_response(),
    }
}

/// POST /api/sign_job: rate the other party of a job.
pub async fn sign_job(
    user: AuthenticatedUser,
    store: web::Data<StoreData>,
    body: web::Json<SignJob>,
) -> impl Responder {
    match job_db::complete_and_rate(
        store.get_ref().as_ref(),
        body.job_id,
        user.0.id,
        body.star_rating,
        Utc::now(),
    )
    .await
    {
        Ok(job) => HttpResponse::Ok().json(SignJobResponse::from(&job)),
        Err(e) => e.to_response(),
    }
}

/// GET /api/my_jobs: jobs where the caller is buyer or provider.
pub async fn my_jobs(
    user: AuthenticatedUser,
    store: web::Data<StoreData>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    match job_db::get_jobs_by_user(store.get_ref().as_ref(), user.0.id).await {
        Ok(mut jobs) => {
            jobs.truncate(query.limit());
            HttpResponse::Ok().json(jobs)
        }
        Err(e) => e.to_response(),
    }
}
