use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Score every user starts from, and the prior ratings are blended toward.
pub const NEUTRAL_SCORE: f64 = 2.5;

/// Ratings needed before the star average is trusted fully.
const FULL_CONFIDENCE_RATINGS: f64 = 10.0;

/// Running rating totals for one user. The totals only ever grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reputation {
    pub user_id: Uuid,
    pub stars_total: u64,
    pub rating_count: u64,
    pub completed_jobs: u64,
    /// Markers of the job credits already counted, one per credit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_credits: Vec<String>,
}

impl Reputation {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            stars_total: 0,
            rating_count: 0,
            completed_jobs: 0,
            applied_credits: Vec::new(),
        }
    }

    pub fn star_average(&self) -> f64 {
        if self.rating_count == 0 {
            return 0.0;
        }
        self.stars_total as f64 / self.rating_count as f64
    }

    /// Star average blended toward the neutral score until enough ratings exist.
    pub fn reputation_score(&self) -> f64 {
        if self.rating_count == 0 {
            return NEUTRAL_SCORE;
        }
        let confidence = (self.rating_count as f64 / FULL_CONFIDENCE_RATINGS).min(1.0);
        self.star_average() * confidence + NEUTRAL_SCORE * (1.0 - confidence)
    }
}

/// Response body for GET /api/account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub star_average: f64,
    pub rating_count: u64,
    pub completed_jobs: u64,
    pub reputation_score: f64,
}

impl From<Reputation> for AccountSummary {
    fn from(r: Reputation) -> Self {
        Self {
            user_id: r.user_id,
            email: None,
            display_name: None,
            star_average: (r.star_average() * 100.0).round() / 100.0,
            rating_count: r.rating_count,
            completed_jobs: r.completed_jobs,
            reputation_score: r.reputation_score(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_users_sit_at_neutral() {
        let r = Reputation::new(Uuid::new_v4());
        assert_eq!(r.star_average(), 0.0);
        assert_eq!(r.reputation_score(), NEUTRAL_SCORE);
    }

    #[test]
    fn score_moves_toward_average_with_more_ratings() {
        let mut r = Reputation::new(Uuid::new_v4());
        r.stars_total = 5;
        r.rating_count = 1;
        // 10% confidence in a 5.0 average.
        assert!((r.reputation_score() - 2.75).abs() < 1e-9);

        r.stars_total = 50;
        r.rating_count = 10;
        assert!((r.reputation_score() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn summary_rounds_average() {
        let mut r = Reputation::new(Uuid::new_v4());
        r.stars_total = 13;
        r.rating_count = 3;
        let summary = AccountSummary::from(r);
        assert_eq!(summary.star_average, 4.33);
    }
}
