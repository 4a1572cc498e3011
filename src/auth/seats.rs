use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::error::{ExchangeError, ExchangeResult, StoreError};
use crate::models::seats::{Seat, SeatCredential, SeatSeed};
use crate::store::{self, Store, keys};

/// Hex SHA-256 of a seat secret; the only form a secret is stored in.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Register (or replace) a seat from its raw secret.
pub async fn register_seat(
    store: &dyn Store,
    seat_id: &str,
    owner: &str,
    secret: &str,
) -> ExchangeResult<Seat> {
    let seat = Seat {
        seat_id: seat_id.to_string(),
        owner: owner.to_string(),
        secret_hash: hash_secret(secret),
    };
    store::put_json(store, &keys::seat(seat_id), &seat).await?;
    Ok(seat)
}

/// Check a presented credential against the registry.
///
/// An unknown seat id is `SeatNotFound`; a wrong secret or owner is
/// `Unauthorized`.
pub async fn verify_seat(store: &dyn Store, credential: &SeatCredential) -> ExchangeResult<Seat> {
    let seat = store::get_json::<Seat>(store, &keys::seat(&credential.id))
        .await?
        .map(|v| v.value)
        .ok_or_else(|| ExchangeError::SeatNotFound(credential.id.clone()))?;

    if let Some(owner) = &credential.owner {
        if owner != &seat.owner {
            warn!("Seat {} presented with wrong owner", seat.seat_id);
            return Err(ExchangeError::Unauthorized);
        }
    }

    let presented = hash_secret(&credential.secret);
    let matches: bool = presented.as_bytes().ct_eq(seat.secret_hash.as_bytes()).into();
    if !matches {
        warn!("Seat {} presented with bad secret", seat.seat_id);
        return Err(ExchangeError::Unauthorized);
    }

    Ok(seat)
}

/// Load the seat registry from a JSON array of `{id, owner, secret_hash}`.
pub async fn load_seed_file(store: &dyn Store, path: &str) -> ExchangeResult<usize> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ExchangeError::Validation(format!("Cannot read seat file {path}: {e}")))?;
    let seeds: Vec<SeatSeed> = serde_json::from_str(&contents).map_err(StoreError::from)?;

    for seed in &seeds {
        let seat = Seat {
            seat_id: seed.id.clone(),
            owner: seed.owner.clone(),
            secret_hash: seed.secret_hash.to_lowercase(),
        };
        store::put_json(store, &keys::seat(&seat.seat_id), &seat).await?;
    }

    info!("Loaded {} seats from {path}", seeds.len());
    Ok(seeds.len())
}
