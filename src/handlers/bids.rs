use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;

use crate::auth::middleware::AuthenticatedUser;
use crate::db::bids as bid_db;
use crate::error::ExchangeError;
use crate::geo::resolve_location;
use crate::matching::MatchingEngine;
use crate::models::ListQuery;
use crate::models::bids::{CancelBid, CreateBid, NearbyQuery};
use crate::store::StoreData;

use super::GeocoderData;

/// POST /api/submit_bid: post a new open bid (requires authentication).
pub async fn submit_bid(
    user: AuthenticatedUser,
    store: web::Data<StoreData>,
    geocoder: web::Data<GeocoderData>,
    body: web::Json<CreateBid>,
) -> impl Responder {
    let mut input = body.into_inner();

    // Geocode address-only bids up front; an unknown address keeps the bid
    // address-only.
    let location_bound = input.location_type.is_none_or(|t| t.is_location_bound());
    if location_bound && input.location.lat.is_none() && input.location.lon.is_none() {
        match resolve_location(geocoder.get_ref().as_ref(), &input.location).await {
            Ok(Some(found)) => {
                input.location.lat = Some(found.lat);
                input.location.lon = Some(found.lon);
            }
            Ok(None) => {}
            Err(e) => return e.to_response(),
        }
    }

    match bid_db::insert_bid(store.get_ref().as_ref(), user.0.id, input, Utc::now()).await {
        Ok(bid) => HttpResponse::Ok().json(serde_json::json!({ "bid_id": bid.id })),
        Err(e) => e.to_response(),
    }
}

/// POST /api/cancel_bid: cancel one of the caller's open bids.
pub async fn cancel_bid(
    user: AuthenticatedUser,
    store: web::Data<StoreData>,
    body: web::Json<CancelBid>,
) -> impl Responder {
    match bid_db::cancel_bid(store.get_ref().as_ref(), body.bid_id, user.0.id, Utc::now()).await {
        Ok(bid) => HttpResponse::Ok().json(bid),
        Err(e) => e.to_response(),
    }
}

/// GET /api/my_bids: bids posted by the caller, newest first.
pub async fn my_bids(
    user: AuthenticatedUser,
    store: web::Data<StoreData>,
    query: web::Query<ListQuery>,
) -> impl Responder {
    match bid_db::get_bids_by_buyer(store.get_ref().as_ref(), user.0.id, Utc::now()).await {
        Ok(mut bids) => {
            bids.truncate(query.limit());
            HttpResponse::Ok().json(bids)
        }
        Err(e) => e.to_response(),
    }
}

/// POST /api/nearby: open on-site bids around a point or address.
pub async fn nearby(
    store: web::Data<StoreData>,
    geocoder: web::Data<GeocoderData>,
    engine: web::Data<MatchingEngine>,
    body: web::Json<NearbyQuery>,
) -> impl Responder {
    let origin = match resolve_location(geocoder.get_ref().as_ref(), &body.location).await {
        Ok(Some(origin)) => origin,
        Ok(None) => {
            return ExchangeError::Validation("A resolvable location is required".into())
                .to_response();
        }
        Err(e) => return e.to_response(),
    };

    let radius = body.radius.unwrap_or(engine.default_max_distance());
    if !radius.is_finite() || radius < 0.0 {
        return ExchangeError::Validation("radius must be a non-negative number".into())
            .to_response();
    }

    match bid_db::get_nearby_bids(store.get_ref().as_ref(), origin, radius, Utc::now()).await {
        Ok(bids) => HttpResponse::Ok().json(bids),
        Err(e) => e.to_response(),
    }
}
