use serde::Deserialize;

/// Default request body limit for uploads (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    /// Actor recorded when a request carries no `x-actor` header.
    pub default_actor: String,
    pub max_upload_bytes: usize,
    pub db_max_connections: u32,
    pub smtp_from_email: String,
    pub smtp_from_name: String,
    /// Governor settings for the public landing-page routes.
    pub public_rate_per_second: u64,
    pub public_rate_burst: u32,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty() && o != "*")
                        .collect()
                })
                .unwrap_or_default(),
            default_actor: std::env::var("DEFAULT_ACTOR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "system".to_string()),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            smtp_from_email: std::env::var("SMTP_FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
            smtp_from_name: std::env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "CRM".to_string()),
            public_rate_per_second: parse_var("PUBLIC_RATE_PER_SECOND", 2)?,
            public_rate_burst: parse_var("PUBLIC_RATE_BURST", 10)?,
        };

        if config.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if config.public_rate_per_second == 0 || config.public_rate_burst == 0 {
            anyhow::bail!("PUBLIC_RATE_PER_SECOND and PUBLIC_RATE_BURST must be positive");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        if config.cors_origins.is_empty() {
            tracing::warn!("CORS_ORIGINS not set, allowing any origin");
        } else {
            tracing::debug!("CORS origins: {:?}", config.cors_origins);
        }
        tracing::debug!("Default actor: {}", config.default_actor);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Configuration for tests and tools that never touch the environment.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/crm_test".to_string(),
            port: 0,
            cors_origins: Vec::new(),
            default_actor: "system".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            db_max_connections: 1,
            smtp_from_email: "noreply@localhost".to_string(),
            smtp_from_name: "CRM".to_string(),
            public_rate_per_second: 2,
            public_rate_burst: 10,
        }
    }
}
