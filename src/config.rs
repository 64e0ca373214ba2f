use serde::Deserialize;
use time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Account-protection knobs. Injected at construction so tests can vary
/// them per case; nothing reads these from the environment after startup.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub max_failed_logins: i32,
    pub lockout_minutes: i64,
    pub reset_token_ttl_minutes: i64,
}

impl SecurityConfig {
    pub fn lockout_duration(&self) -> Duration {
        Duration::minutes(self.lockout_minutes)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::minutes(self.reset_token_ttl_minutes)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "hirepath".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "hirepath-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(15),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 7),
        };
        let security = SecurityConfig {
            max_failed_logins: std::env::var("MAX_FAILED_LOGINS")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(5),
            lockout_minutes: std::env::var("LOCKOUT_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(15),
            reset_token_ttl_minutes: std::env::var("RESET_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
        };
        Ok(Self {
            database_url,
            jwt,
            security,
        })
    }
}
