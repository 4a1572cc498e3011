#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use service_exchange::ExchangeConfig;
use service_exchange::auth::jwt::Claims;
use service_exchange::auth::seats::register_seat;
use service_exchange::classifier::{CapabilityClassifier, ClassifierError};
use service_exchange::db::bids::insert_bid;
use service_exchange::matching::{GrabRequest, MatchingEngine};
use service_exchange::models::bids::{Bid, CreateBid, ServiceDescription};
use service_exchange::models::location::{Coordinates, LocationInput, LocationType};
use service_exchange::models::seats::SeatCredential;
use service_exchange::store::{MemoryStore, StoreData};

/// HS256 secret the test servers verify bearer tokens with.
pub const TOKEN_SECRET: &str = "exchange-test-secret-long-enough-for-hs256-signing";

pub const DENVER: Coordinates = Coordinates {
    lat: 39.7392,
    lon: -104.9903,
};

/// Accepts every candidate.
pub struct AcceptAll;

#[async_trait]
impl CapabilityClassifier for AcceptAll {
    async fn is_compatible(&self, _service: &str, _capabilities: &str) -> Result<bool, ClassifierError> {
        Ok(true)
    }
}

/// Fails on services containing `fail_on`, rejects everything else.
pub struct FailOn(pub &'static str);

#[async_trait]
impl CapabilityClassifier for FailOn {
    async fn is_compatible(&self, service: &str, _capabilities: &str) -> Result<bool, ClassifierError> {
        if service.contains(self.0) {
            Err(ClassifierError::Malformed("upstream unavailable".into()))
        } else {
            Ok(false)
        }
    }
}

/// Answers yes, but only after `delay`.
pub struct Slow(pub Duration);

#[async_trait]
impl CapabilityClassifier for Slow {
    async fn is_compatible(&self, _service: &str, _capabilities: &str) -> Result<bool, ClassifierError> {
        tokio::time::sleep(self.0).await;
        Ok(true)
    }
}

/// Answers no, but only after `delay`.
pub struct SlowReject(pub Duration);

#[async_trait]
impl CapabilityClassifier for SlowReject {
    async fn is_compatible(&self, _service: &str, _capabilities: &str) -> Result<bool, ClassifierError> {
        tokio::time::sleep(self.0).await;
        Ok(false)
    }
}

/// Errors on its first `n` calls, then accepts everything.
pub struct RecoversAfter(pub AtomicUsize);

impl RecoversAfter {
    pub fn new(n: usize) -> Self {
        Self(AtomicUsize::new(n))
    }
}

#[async_trait]
impl CapabilityClassifier for RecoversAfter {
    async fn is_compatible(&self, _service: &str, _capabilities: &str) -> Result<bool, ClassifierError> {
        let failing = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClassifierError::Malformed("upstream unavailable".into()));
        }
        Ok(true)
    }
}

pub fn config() -> ExchangeConfig {
    ExchangeConfig {
        sweep_interval: None,
        ..ExchangeConfig::default()
    }
}

pub fn new_store() -> StoreData {
    Arc::new(MemoryStore::new())
}

pub fn engine(store: &StoreData, classifier: impl CapabilityClassifier + 'static) -> MatchingEngine {
    MatchingEngine::new(store.clone(), Arc::new(classifier), &config())
}

/// Register a seat and return the credential that unlocks it.
pub async fn seat(store: &StoreData, id: &str) -> SeatCredential {
    let secret = format!("{id}-phrase");
    register_seat(store.as_ref(), id, "provider@example.com", &secret)
        .await
        .expect("seat registers");
    SeatCredential {
        id: id.to_string(),
        owner: None,
        secret,
    }
}

pub fn remote_bid(service: &str, price: f64) -> CreateBid {
    CreateBid {
        service: ServiceDescription::Text(service.to_string()),
        price,
        currency: None,
        payment_method: None,
        category: None,
        location_type: Some(LocationType::Remote),
        location: LocationInput::default(),
        end_time: Utc::now().timestamp() + 3600,
    }
}

pub fn physical_bid(service: &str, price: f64, at: Coordinates) -> CreateBid {
    CreateBid {
        location_type: Some(LocationType::Physical),
        location: LocationInput {
            lat: Some(at.lat),
            lon: Some(at.lon),
            address: None,
        },
        ..remote_bid(service, price)
    }
}

pub async fn post(store: &StoreData, input: CreateBid) -> Bid {
    insert_bid(store.as_ref(), Uuid::new_v4(), input, Utc::now())
        .await
        .expect("bid is valid")
}

pub fn remote_grab(seat: SeatCredential, provider_id: Uuid) -> GrabRequest {
    GrabRequest {
        seat,
        provider_id,
        capabilities: "general handyman, design, writing".into(),
        location_type: LocationType::Remote,
        location: None,
        max_distance: None,
    }
}

/// Claims of a signed-in marketplace user, valid for an hour.
pub fn user_claims(user: Uuid) -> Claims {
    let now = Utc::now().timestamp() as usize;
    Claims {
        sub: user.to_string(),
        exp: now + 3600,
        iat: Some(now),
        iss: None,
        email: Some(format!("{user}@example.com")),
        role: Some("authenticated".to_string()),
        user_metadata: None,
    }
}

pub fn sign(claims: &Claims, secret: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("claims encode")
}

pub fn token_for(user: Uuid) -> String {
    sign(&user_claims(user), TOKEN_SECRET)
}
