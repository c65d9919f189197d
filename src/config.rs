use std::net::SocketAddr;

use anyhow::{Context, Result};
use time::Duration;

use crate::platform::PlatformConfig;

/// An admin account ensured at startup, so a fresh deployment has someone
/// to approve sign-ups.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub platform: PlatformConfig,
    pub admin: Option<AdminSeed>,
}

impl Config {
    /// Reads `.env` if there is one, then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let signing_secret = var("SIGNING_SECRET").context("SIGNING_SECRET must be set")?;

        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_owned())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be host:port")?;
        let public_url = var("PUBLIC_URL").unwrap_or_else(|| "http://localhost:8080".to_owned());
        let session_ttl_hours: i64 = var("SESSION_TTL_HOURS")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("SESSION_TTL_HOURS must be a number")?
            .unwrap_or(168);

        let admin = match (var("ADMIN_EMAIL"), var("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                email,
                password,
                username: var("ADMIN_USERNAME").unwrap_or_else(|| "admin".to_owned()),
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr,
            platform: PlatformConfig {
                database_url,
                public_url: public_url.trim_end_matches('/').to_owned(),
                signing_secret,
                session_ttl: Duration::hours(session_ttl_hours),
                bcrypt_cost: bcrypt::DEFAULT_COST,
            },
            admin,
        })
    }
}
