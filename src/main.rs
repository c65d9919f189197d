use anyhow::{Context, Result};
use huddle::{
    Platform,
    config::{AdminSeed, Config},
    platform::PlatformError,
    server,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle=debug,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    let platform = Platform::connect(&config.platform)
        .await
        .context("failed to open database")?;

    if let Some(seed) = &config.admin {
        seed_admin(&platform, seed).await?;
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    server::serve(listener, platform).await?;
    Ok(())
}

/// Creates the seed account on first start and makes sure it is an active
/// admin. An existing account keeps its password.
async fn seed_admin(platform: &Platform, seed: &AdminSeed) -> Result<()> {
    match platform
        .sign_up(&seed.email, &seed.password, &seed.username, &seed.username)
        .await
    {
        Ok(session) => {
            platform.sign_out(&session.access_token).await?;
            info!(email = %seed.email, "admin account created");
        }
        Err(PlatformError::Conflict(what)) => {
            warn!(email = %seed.email, "admin account exists ({what} taken), promoting");
        }
        Err(err) => return Err(err).context("failed to create admin account"),
    }

    platform.promote_to_admin(&seed.email).await?;
    Ok(())
}
