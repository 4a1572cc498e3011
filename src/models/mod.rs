pub mod bids;
pub mod jobs;
pub mod location;
pub mod reputation;
pub mod seats;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, 200)
    }
}
