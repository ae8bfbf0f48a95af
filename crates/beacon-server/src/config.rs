use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use beacon_types::status::Snowflake;

pub enum StoreKind {
    Memory,
    Sqlite(PathBuf),
}

pub struct Config {
    pub discord_token: String,
    pub target: Snowflake,
    pub gateway_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub reconcile_every: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = var("DISCORD_TOKEN").unwrap_or_default();
        if discord_token.trim().is_empty() {
            bail!("DISCORD_TOKEN is not set");
        }

        let target: Snowflake = var("DISCORD_USER_ID")
            .context("DISCORD_USER_ID is not set")?
            .parse()
            .context("DISCORD_USER_ID must be a numeric Discord user ID")?;

        let gateway_url = var("DISCORD_GATEWAY_URL")
            .filter(|url| !url.is_empty());

        let host = var("BEACON_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("BEACON_PORT")
            .or_else(|| var("PORT"))
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("BEACON_PORT must be a port number")?;

        let store = match var("BEACON_STORE")
            .unwrap_or_else(|| "memory".into())
            .as_str()
        {
            "memory" => StoreKind::Memory,
            "sqlite" => StoreKind::Sqlite(
                var("BEACON_DB_PATH")
                    .unwrap_or_else(|| "beacon.db".into())
                    .into(),
            ),
            other => bail!("Unknown BEACON_STORE '{}'. Supported: memory, sqlite", other),
        };

        let reconcile_secs: u64 = match var("BEACON_RECONCILE_SECS") {
            Some(v) => v
                .parse()
                .context("BEACON_RECONCILE_SECS must be a whole number of seconds")?,
            None => 5,
        };
        if reconcile_secs == 0 {
            bail!("BEACON_RECONCILE_SECS must be greater than zero");
        }

        Ok(Self {
            discord_token,
            target,
            gateway_url,
            host,
            port,
            store,
            reconcile_every: Duration::from_secs(reconcile_secs),
        })
    }
}
