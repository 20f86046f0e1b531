use std::env;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl StoreBackend {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            _ => StoreBackend::Sqlite,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub store_backend: StoreBackend,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub sweep_interval_secs: u64,
    pub await_max_timeout_ms: u64,
    pub completion_webhook_url: Option<String>,
    pub completion_webhook_secret: String,
    pub webhook_max_retries: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/flows.db".to_string()),
            store_backend: env::var("FLOW_STORE")
                .map(|v| StoreBackend::parse(&v))
                .unwrap_or(StoreBackend::Sqlite),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "dev-change-me".to_string()),
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "mcp-tool-validation".to_string()),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or_else(|_| "mcp-tool-validation-api".to_string()),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            await_max_timeout_ms: env::var("AWAIT_MAX_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
            completion_webhook_url: env::var("COMPLETION_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            completion_webhook_secret: env::var("COMPLETION_WEBHOOK_SECRET")
                .unwrap_or_else(|_| "dev-change-me".to_string()),
            webhook_max_retries: env::var("WEBHOOK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StoreBackend;

    #[test]
    fn unknown_backend_falls_back_to_sqlite() {
        assert_eq!(StoreBackend::parse("Memory"), StoreBackend::Memory);
        assert_eq!(StoreBackend::parse("sqlite"), StoreBackend::Sqlite);
        assert_eq!(StoreBackend::parse("redis"), StoreBackend::Sqlite);
    }
}
