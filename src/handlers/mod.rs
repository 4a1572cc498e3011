pub mod account;
pub mod bids;
pub mod jobs;

use actix_web::web;
use std::sync::Arc;

use crate::geo::Geocoder;

/// App data wrapper for the geocoding collaborator.
pub type GeocoderData = Arc<dyn Geocoder>;

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/ping")
            .route(web::get().to(account::ping))
            .route(web::post().to(account::ping)),
    );

    // ── Buyer routes (require valid JWT) ──
    cfg.route("/submit_bid", web::post().to(bids::submit_bid));
    cfg.route("/cancel_bid", web::post().to(bids::cancel_bid));
    cfg.route("/my_bids", web::get().to(bids::my_bids));

    // ── Provider routes (JWT plus seat credential for grabs) ──
    cfg.route("/grab_job", web::post().to(jobs::grab_job));
    cfg.route("/sign_job", web::post().to(jobs::sign_job));
    cfg.route("/my_jobs", web::get().to(jobs::my_jobs));

    // ── Public ──
    cfg.route("/nearby", web::post().to(bids::nearby));

    cfg.route("/account", web::get().to(account::account));
}
