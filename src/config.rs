use std::env;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StorageBackend::Postgres),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            other => Err(anyhow!("unknown STORAGE_BACKEND `{other}` (expected postgres or memory)")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub storage: StorageBackend,
    pub run_migrations: bool,
    pub db_max_connections: u32,
    pub api_token_sha256: Option<String>,
    pub default_page_limit: i64,
    pub default_tax_rate: i32,
}

fn parsed<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{key}: {e}")),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let storage = parsed("STORAGE_BACKEND", StorageBackend::Postgres)?;
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
        if storage == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when STORAGE_BACKEND=postgres");
        }

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let api_token_sha256 = env::var("API_TOKEN_SHA256")
            .ok()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());
        if let Some(hash) = &api_token_sha256 {
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                bail!("API_TOKEN_SHA256 must be a 64 character hex digest");
            }
        }

        let default_tax_rate = parsed("DEFAULT_TAX_RATE", 22)?;
        if !(0..=100).contains(&default_tax_rate) {
            bail!("DEFAULT_TAX_RATE must be between 0 and 100");
        }

        Ok(Self {
            database_url,
            bind_addr,
            storage,
            run_migrations: parsed("RUN_MIGRATIONS", false).context("RUN_MIGRATIONS must be true or false")?,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 5)?,
            api_token_sha256,
            default_page_limit: parsed("DEFAULT_PAGE_LIMIT", 50)?,
            default_tax_rate,
        })
    }
}
