use serde::{Deserialize, Serialize};

/// A registered seat. Only the hash of its secret is ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub seat_id: String,
    pub owner: String,
    pub secret_hash: String,
}

/// Seat credential presented with a grab request.
#[derive(Clone, Deserialize)]
pub struct SeatCredential {
    pub id: String,
    pub owner: Option<String>,
    pub secret: String,
}

impl std::fmt::Debug for SeatCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeatCredential")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One entry of the seat registry seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeatSeed {
    pub id: String,
    pub owner: String,
    pub secret_hash: String,
}

/// Value stored under a seat's cooldown key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrabStamp {
    pub last_grab_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secret() {
        let credential = SeatCredential {
            id: "RSX0000000".into(),
            owner: Some("@satori_jojo".into()),
            secret: "hunter2".into(),
        };
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("RSX0000000"));
        assert!(!rendered.contains("hunter2"));
    }
}
