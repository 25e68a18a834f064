//! Process configuration.

use vidq_db::PoolConfig;
use vidq_jobs::WorkerConfig;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/vidq";

/// Everything a worker process reads from its environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub pool: PoolConfig,
    pub worker: WorkerConfig,
    /// Apply migrations before opening the gate; otherwise wait for the schema.
    pub run_migrations: bool,
}

impl ServerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_URL` | `postgres://localhost/vidq` | Job store |
    /// | `RUN_MIGRATIONS` | `true` | Migrate on startup |
    ///
    /// Pool and coordinator settings come from [`PoolConfig::from_env`] and
    /// [`WorkerConfig::from_env`].
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let run_migrations = std::env::var("RUN_MIGRATIONS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            database_url,
            pool: PoolConfig::from_env(),
            worker: WorkerConfig::from_env(),
            run_migrations,
        }
    }
}

/// Connection string with the password masked, for logs.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://vidq:secret@db:5432/vidq"),
            "postgres://vidq:***@db:5432/vidq"
        );
        assert_eq!(
            redact_url("postgres://localhost/vidq"),
            "postgres://localhost/vidq"
        );
        assert_eq!(redact_url("postgres://u@h/db"), "postgres://u@h/db");
    }
}
