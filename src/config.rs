use std::time::Duration;

/// Matching and collaborator settings read from the environment.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Minimum interval between two grab attempts from one seat.
    pub grab_cooldown: Duration,
    /// Search radius in miles when a request does not name one.
    pub default_max_distance_miles: f64,
    /// Upper bound on a single classifier round trip.
    pub classifier_timeout: Duration,
    /// Upper bound on a whole grab_job call.
    pub grab_deadline: Duration,
    pub classifier: ClassifierConfig,
    pub geocoder_url: String,
    /// `None` disables the background sweeper.
    pub sweep_interval: Option<Duration>,
    pub key_prefix: String,
    pub seats_file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "anthropic/claude-3-haiku";

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            grab_cooldown: Duration::from_secs(900),      // 15 minutes
            default_max_distance_miles: 10.0,
            classifier_timeout: Duration::from_secs(5),
            grab_deadline: Duration::from_secs(30),
            classifier: ClassifierConfig {
                url: None,
                api_key: None,
                model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            },
            geocoder_url: DEFAULT_GEOCODER_URL.to_string(),
            sweep_interval: Some(Duration::from_secs(300)), // 5 minutes
            key_prefix: "sex".to_string(),
            seats_file: None,
        }
    }
}

impl ExchangeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let sweep_secs = parse_secs("SWEEP_INTERVAL_SECS", 300);

        Self {
            grab_cooldown: parse_duration_secs("GRAB_COOLDOWN_SECS", 900),
            default_max_distance_miles: std::env::var("DEFAULT_MAX_DISTANCE_MILES")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(defaults.default_max_distance_miles),
            classifier_timeout: parse_duration_secs("CLASSIFIER_TIMEOUT_SECS", 5),
            grab_deadline: parse_duration_secs("GRAB_DEADLINE_SECS", 30),
            classifier: ClassifierConfig {
                url: non_empty_var("CLASSIFIER_URL"),
                api_key: non_empty_var("CLASSIFIER_API_KEY"),
                model: non_empty_var("CLASSIFIER_MODEL").unwrap_or(defaults.classifier.model),
            },
            geocoder_url: non_empty_var("GEOCODER_URL").unwrap_or(defaults.geocoder_url),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            key_prefix: std::env::var("KEY_PREFIX").unwrap_or(defaults.key_prefix),
            seats_file: non_empty_var("SEATS_FILE"),
        }
    }
}

fn non_empty_var(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(env_var: &str, default: u64) -> u64 {
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(env_var: &str, default: u64) -> Duration {
    Duration::from_secs(parse_secs(env_var, default))
}
