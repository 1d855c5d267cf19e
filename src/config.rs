use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./shortener.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when rendering short links, e.g. "https://go.example.com".
    /// Never has a trailing slash.
    pub base_url: String,

    /// Length of generated short codes
    pub short_code_length: usize,

    /// HMAC secret for session tokens
    pub jwt_secret: String,

    /// How many hours a session token remains valid
    pub jwt_expire_hours: u64,

    /// Requests allowed per client IP within one window
    pub rate_limit_requests: u32,

    pub rate_limit_window_secs: u64,

    /// Allowed CORS origins; `["*"]` allows any
    pub cors_allow_origins: Vec<String>,

    /// Peers (IPs or CIDR blocks) whose X-Forwarded-For / X-Real-IP headers
    /// are believed. Empty trusts nobody.
    pub trusted_proxies: Vec<String>,

    pub log_format: LogFormat,

    /// Look up visitor country/city via ip-api.com when recording clicks
    pub geo_lookup: bool,

    /// Seconds between expired-link sweeps; 0 disables the sweep
    pub expired_sweep_interval_secs: u64,

    /// How long an expired link is kept before the sweep deletes it
    pub expired_retention_hours: u64,
}

// Hand-written so the JWT secret never reaches the logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_url", &self.base_url)
            .field("short_code_length", &self.short_code_length)
            .field("jwt_secret", &"[MASKED]")
            .field("jwt_expire_hours", &self.jwt_expire_hours)
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("cors_allow_origins", &self.cors_allow_origins)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("log_format", &self.log_format)
            .field("geo_lookup", &self.geo_lookup)
            .field("expired_sweep_interval_secs", &self.expired_sweep_interval_secs)
            .field("expired_retention_hours", &self.expired_retention_hours)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("JWT_SECRET")
            .context("JWT_SECRET must be set in the environment or .env file")?;

        let port = parse_or(var("PORT"), 8080u16)
            .context("PORT must be a valid port number (1–65535)")?;

        let short_code_length = parse_or(var("SHORT_CODE_LENGTH"), 6usize)
            .context("SHORT_CODE_LENGTH must be a number")?;
        if !(4..=32).contains(&short_code_length) {
            anyhow::bail!("SHORT_CODE_LENGTH must be between 4 and 32, got {short_code_length}");
        }

        let base_url = var("BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let cors_allow_origins = var("CORS_ALLOW_ORIGINS")
            .map(|v| split_list(&v))
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_owned()]);

        let trusted_proxies = var("TRUSTED_PROXIES")
            .map(|v| split_list(&v))
            .unwrap_or_default();
        if let Some(bad) = trusted_proxies.iter().find(|p| !crate::ip::is_valid_proxy_entry(p)) {
            anyhow::bail!("TRUSTED_PROXIES entries must be IPs or CIDR blocks, got '{bad}'");
        }

        let log_format = match var("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => LogFormat::Pretty,
            Some(f) if f == "pretty" || f == "text" => LogFormat::Pretty,
            Some(f) if f == "json" => LogFormat::Json,
            Some(other) => anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got '{other}'"),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:./shortener.db".into()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            base_url,
            short_code_length,
            jwt_secret,
            jwt_expire_hours: parse_or(var("JWT_EXPIRE_HOURS"), 24)
                .context("JWT_EXPIRE_HOURS must be a number of hours")?,
            rate_limit_requests: parse_or(var("RATE_LIMIT_REQUESTS"), 100)
                .context("RATE_LIMIT_REQUESTS must be a number")?,
            rate_limit_window_secs: parse_or(var("RATE_LIMIT_WINDOW_SECS"), 60)
                .context("RATE_LIMIT_WINDOW_SECS must be a number of seconds")?,
            cors_allow_origins,
            trusted_proxies,
            log_format,
            geo_lookup: parse_or(var("GEO_LOOKUP"), false)
                .context("GEO_LOOKUP must be 'true' or 'false'")?,
            expired_sweep_interval_secs: parse_or(var("EXPIRED_SWEEP_INTERVAL_SECS"), 0)
                .context("EXPIRED_SWEEP_INTERVAL_SECS must be a number of seconds")?,
            expired_retention_hours: parse_or(var("EXPIRED_RETENTION_HOURS"), 24)
                .context("EXPIRED_RETENTION_HOURS must be a number of hours")?,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_or<T>(value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => Ok(v.trim().parse::<T>()?),
        None => Ok(default),
    }
}
