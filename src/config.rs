use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// Shared secret for inbound webhook signatures; empty skips validation
    /// (dev mode).
    pub turn_signing_secret: String,
    pub draft_ttl_minutes: i64,
    pub offer_ttl_minutes: i64,
    pub dedup_window_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "bookline.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            turn_signing_secret: env::var("TURN_SIGNING_SECRET").unwrap_or_default(),
            draft_ttl_minutes: env::var("DRAFT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            offer_ttl_minutes: env::var("OFFER_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            dedup_window_secs: env::var("DEDUP_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
        }
    }
}
