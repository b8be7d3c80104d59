use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Cron expression for the reminder scan loop.
    pub reminder_cron: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://estate:@localhost:5432/estateserver".to_string());
        // Every two minutes by default.
        let reminder_cron =
            env::var("REMINDER_CRON").unwrap_or_else(|_| "0 */2 * * * *".to_string());

        Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig { url },
            reminder_cron,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_env();
        assert!(!config.bind_addr().is_empty());
        assert!(config.reminder_cron.split_whitespace().count() >= 5);
    }
}
