use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwks::JwksCache;

/// Supabase JWT claims.
///
/// The `sub` field is the user's UUID in `auth.users`; it identifies buyers
/// and providers throughout the exchange.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Token expiration (Unix timestamp).
    pub exp: usize,
    pub iat: Option<usize>,
    pub iss: Option<String>,
    pub email: Option<String>,
    /// Supabase role (e.g. "authenticated").
    pub role: Option<String>,
    pub user_metadata: Option<UserMetadata>,
}

/// Metadata populated by the OAuth provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserMetadata {
    pub full_name: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub picture: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
}

impl Claims {
    /// Extract the user UUID from the `sub` claim.
    pub fn user_id(&self) -> Result<Uuid, String> {
        Uuid::parse_str(&self.sub).map_err(|e| format!("Invalid UUID in sub claim: {e}"))
    }

    /// Best-effort display name from metadata.
    pub fn display_name(&self) -> Option<String> {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.full_name.clone().or_else(|| m.name.clone()))
    }

    pub fn avatar_url(&self) -> Option<String> {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.avatar_url.clone().or_else(|| m.picture.clone()))
    }

    /// Best-effort email: prefer top-level, fall back to metadata.
    pub fn user_email(&self) -> Option<String> {
        self.email
            .clone()
            .or_else(|| self.user_metadata.as_ref().and_then(|m| m.email.clone()))
    }
}

/// Validate an HS256 Supabase JWT against the project's shared secret.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Token validation failed: {e:?}"))
}

/// How bearer tokens are checked: a shared HS256 secret, or the project's
/// published signing keys.
#[derive(Clone)]
pub enum TokenVerifier {
    SharedSecret(String),
    Jwks(JwksCache),
}

impl TokenVerifier {
    /// Prefer `SUPABASE_JWT_SECRET`; otherwise use JWKS from `SUPABASE_URL`
    /// and `SUPABASE_ANON_KEY`. `None` when neither is configured.
    pub fn from_env() -> Option<Self> {
        if let Ok(secret) = std::env::var("SUPABASE_JWT_SECRET") {
            if !secret.trim().is_empty() {
                return Some(Self::SharedSecret(secret));
            }
        }
        let url = std::env::var("SUPABASE_URL").ok()?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").ok()?;
        Some(Self::Jwks(JwksCache::new(&url, &anon_key)))
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, String> {
        match self {
            Self::SharedSecret(secret) => validate_token(token, secret),
            Self::Jwks(cache) => cache.validate_token(token).await.map(|td| td.claims),
        }
    }
}
