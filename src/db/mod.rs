pub mod bids;
pub mod jobs;
pub mod reputation;

/// Attempts a read-modify-swap loop makes before giving up with
/// [`crate::error::StoreError::Contention`].
pub const MAX_CAS_RETRIES: usize = 16;
