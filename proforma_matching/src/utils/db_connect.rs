// src/utils/db_connect.rs
use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::info;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::{Config, NoTls};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Shape of the JSON connection file: `{"url": "postgresql://..."}`.
#[derive(Debug, Deserialize)]
struct ConnStringFile {
    url: String,
}

/// Drops a driver qualifier such as `postgresql+psycopg2://`, which libpq-style parsers reject.
fn strip_driver(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let base = scheme.split('+').next().unwrap_or(scheme);
            format!("{}://{}", base, rest)
        }
        None => url.to_string(),
    }
}

fn config_from_url(url: &str) -> Result<Config> {
    Config::from_str(&strip_driver(url.trim())).context("Invalid PostgreSQL connection URL")
}

fn read_conn_string_file(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed: ConnStringFile = serde_json::from_str(&raw)
        .with_context(|| format!("Expected a JSON object with a \"url\" key in {}", path.display()))?;
    config_from_url(&parsed.url)
}

/// Reads environment variables and constructs a PostgreSQL config.
/// `DATABASE_URL` wins, then the JSON connection file, then `POSTGRES_*`.
pub fn build_pg_config() -> Result<Config> {
    let mut config = if let Ok(url) = std::env::var("DATABASE_URL") {
        info!("DB Config: using DATABASE_URL");
        config_from_url(&url)?
    } else {
        let conn_file =
            std::env::var("CONN_STRING_FILE").unwrap_or_else(|_| "conn_string.json".to_string());
        if Path::new(&conn_file).is_file() {
            info!("DB Config: using connection file {}", conn_file);
            read_conn_string_file(Path::new(&conn_file))?
        } else {
            let mut config = Config::new();
            let host = std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
            let port_str = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
            let port = port_str.parse::<u16>().unwrap_or(5432);
            let dbname = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "dataplatform".to_string());
            let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
            let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();

            info!(
                "DB Config: Host={}, Port={}, DB={}, User={}",
                host, port, dbname, user
            );
            config
                .host(&host)
                .port(port)
                .dbname(&dbname)
                .user(&user)
                .password(&password);
            config
        }
    };
    config.application_name("proforma_matching");
    config.connect_timeout(Duration::from_secs(10));
    Ok(config)
}

/// Initializes the database connection pool.
pub async fn connect() -> Result<PgPool> {
    let config = build_pg_config()?;
    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(config, NoTls);

    // Deals are processed one at a time; a couple of connections is plenty.
    let pool = Pool::builder()
        .max_size(4)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    // Test connection
    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    drop(conn);
    info!("Database connection pool initialized successfully.");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_strip_driver() {
        assert_eq!(
            strip_driver("postgresql+psycopg2://u:p@db:5432/deals"),
            "postgresql://u:p@db:5432/deals"
        );
        assert_eq!(strip_driver("postgres://u@db/deals"), "postgres://u@db/deals");
        assert_eq!(strip_driver("host=db user=u"), "host=db user=u");
    }

    #[test]
    fn test_conn_string_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn_string.json");
        std::fs::write(&path, r#"{"url": "postgresql+psycopg2://analyst:pw@db.local:5433/acq"}"#)
            .unwrap();
        let config = read_conn_string_file(&path).unwrap();
        assert_eq!(config.get_user(), Some("analyst"));
        assert_eq!(config.get_dbname(), Some("acq"));
        assert_eq!(config.get_ports(), &[5433]);

        std::fs::write(&path, r#"{"uri": "x"}"#).unwrap();
        assert!(read_conn_string_file(&path).is_err());
    }
}
