//! Layered configuration — read once from the environment at startup.
//!
//! Malformed typed fields (a non-numeric `PORT`, for instance) fail fast
//! with context rather than falling back to a default; an unrecognized
//! `DB_TYPE` falls back to `sqlite` with a warning instead of failing. A
//! *recognized* but unimplemented backend (`postgres`, `mssql`, `mongodb`)
//! is parsed as-is rather than coerced — it fails fast at store-construction
//! time instead, so admin tooling targeting those backends doesn't fail
//! config parsing.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Sqlite,
    Postgres,
    Mssql,
    Mongodb,
}

impl DbType {
    fn parse(raw: &str) -> Self {
        match raw {
            "sqlite" => DbType::Sqlite,
            "postgres" => DbType::Postgres,
            "mssql" => DbType::Mssql,
            "mongodb" => DbType::Mongodb,
            other => {
                tracing::warn!(db_type = other, "unrecognized DB_TYPE, falling back to sqlite");
                DbType::Sqlite
            }
        }
    }
}

/// Optional bootstrap seed read from `MASTER_CONN_*` / `MASTER_VKEY_*`.
#[derive(Debug, Clone)]
pub struct MasterSeedConfig {
    pub conn_name: String,
    pub conn_provider: String,
    pub conn_endpoint: String,
    pub conn_api_key: String,
    pub conn_model: String,
    pub vkey_name: String,
    pub vkey_key: String,
    pub vkey_tps: f64,
    pub vkey_tokens: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_type: DbType,
    pub db_dsn: String,
    pub port: u16,
    pub encryption_key: String,
    pub master_seed: Option<MasterSeedConfig>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let db_type = env::var("DB_TYPE")
            .map(|v| DbType::parse(&v))
            .unwrap_or(DbType::Sqlite);

        let db_dsn = env::var("DB_DSN").unwrap_or_else(|_| "llm_proxy.db".to_string());

        let port: u16 = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {:?}", raw))?,
            Err(_) => 8132,
        };

        let encryption_key = env::var("ENCRYPTION_KEY").unwrap_or_default();

        let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "llm_proxy=info".to_string());

        let master_seed = load_master_seed()?;

        Ok(Self {
            db_type,
            db_dsn,
            port,
            encryption_key,
            master_seed,
            log_filter,
        })
    }
}

fn load_master_seed() -> Result<Option<MasterSeedConfig>> {
    let conn_name = match env::var("MASTER_CONN_NAME") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    let conn_provider = env::var("MASTER_CONN_PROVIDER")
        .context("MASTER_CONN_NAME is set but MASTER_CONN_PROVIDER is missing")?;
    let conn_endpoint = env::var("MASTER_CONN_ENDPOINT")
        .context("MASTER_CONN_NAME is set but MASTER_CONN_ENDPOINT is missing")?;
    let conn_api_key = env::var("MASTER_CONN_API_KEY")
        .context("MASTER_CONN_NAME is set but MASTER_CONN_API_KEY is missing")?;
    let conn_model = env::var("MASTER_CONN_MODEL").unwrap_or_else(|_| conn_provider.clone());

    let vkey_name = env::var("MASTER_VKEY_NAME").unwrap_or_else(|_| "default".to_string());
    let vkey_key =
        env::var("MASTER_VKEY_KEY").context("MASTER_CONN_NAME is set but MASTER_VKEY_KEY is missing")?;

    let vkey_tps: f64 = match env::var("MASTER_VKEY_TPS") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("MASTER_VKEY_TPS is not a valid number: {:?}", raw))?,
        Err(_) => 10.0,
    };
    let vkey_tokens: i64 = match env::var("MASTER_VKEY_TOKENS") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("MASTER_VKEY_TOKENS is not a valid number: {:?}", raw))?,
        Err(_) => 50_000,
    };

    Ok(Some(MasterSeedConfig {
        conn_name,
        conn_provider,
        conn_endpoint,
        conn_api_key,
        conn_model,
        vkey_name,
        vkey_key,
        vkey_tps,
        vkey_tokens,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_type_falls_back_to_sqlite_only_for_unrecognized_values() {
        assert_eq!(DbType::parse("made-up-backend"), DbType::Sqlite);
        assert_eq!(DbType::parse("sqlite"), DbType::Sqlite);
    }

    #[test]
    fn db_type_recognizes_unimplemented_backends_without_coercion() {
        assert_eq!(DbType::parse("postgres"), DbType::Postgres);
        assert_eq!(DbType::parse("mssql"), DbType::Mssql);
        assert_eq!(DbType::parse("mongodb"), DbType::Mongodb);
    }
}
