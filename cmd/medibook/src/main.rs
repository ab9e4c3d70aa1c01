//! # Medibook server
//!
//! Assembles the booking core from the adapters selected by compile-time
//! features and runtime settings, then serves the HTTP API.

#[cfg(not(feature = "web-axum"))]
compile_error!("the medibook server needs the `web-axum` feature");

mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api_adapters::{router, AppState, MeteredRateLimit, Metrics};
use auth_adapters::SessionIdentityProvider;
use configs::Settings;
use domains::{Clock, IdentityProvider, Notifier, SystemClock};
use notification_adapters::{LogNotifier, MailRelayNotifier};
use secrecy::SecretString;
use services::{
    assemble, ClinicClock, CoreOptions, GatewayOptions, LimiterConfigs, LimiterName, RateLimiters, Repositories,
    SweeperHandle,
};
use storage_adapters::MemoryStore;
use tracing::{info, warn};

#[cfg(any(feature = "db-postgres", feature = "redis", feature = "auth-jwt"))]
use secrecy::ExposeSecret;

#[cfg(feature = "auth-jwt")]
use auth_adapters::JwtIdentityProvider;
#[cfg(feature = "db-postgres")]
use storage_adapters::PgStore;
#[cfg(feature = "redis")]
use storage_adapters::{redis_limit, RedisRateLimiter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    telemetry::init(&settings.log);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let clinic = ClinicClock::new(clock.clone(), settings.clinic.utc_offset_minutes)?;
    let metrics = Arc::new(Metrics::new());

    // 1. Data store
    let repos = open_store(&settings).await?;

    // 2. Rate limiters
    let (limiters, sweeper) = build_limiters(&settings, clock.clone(), &metrics)?;

    // 3. Identity
    let identity = build_identity(&settings, &repos, clock.clone());

    // 4. Notifications
    let notifier = build_notifier(&settings)?;

    let gateway = assemble(
        &repos,
        notifier,
        identity,
        limiters,
        clinic,
        CoreOptions {
            provider_name: settings.clinic.provider_name.clone(),
            transition_policy: settings.clinic.transition_policy(),
            gateway: GatewayOptions {
                identifier_policy: settings.identifier_policy,
                allow_anonymous_booking: settings.auth.allow_anonymous_booking,
            },
        },
    );
    let app = router(AppState::new(Arc::new(gateway), metrics));

    let address = settings.server.address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(%address, "medibook listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    info!("medibook stopped");
    Ok(())
}

async fn open_store(settings: &Settings) -> anyhow::Result<Repositories> {
    if let Some(url) = &settings.database.url {
        if let Some(repos) = postgres_store(url, settings.database.max_connections).await? {
            return Ok(repos);
        }
    } else {
        warn!("no database configured; bookings live in memory and are lost on restart");
    }
    Ok(Repositories::from_store(Arc::new(MemoryStore::new())))
}

#[cfg(feature = "db-postgres")]
async fn postgres_store(url: &SecretString, max_connections: u32) -> anyhow::Result<Option<Repositories>> {
    let store = PgStore::connect(url.expose_secret(), max_connections).await?;
    store.migrate().await?;
    info!("using postgres store");
    Ok(Some(Repositories::from_store(Arc::new(store))))
}

#[cfg(not(feature = "db-postgres"))]
async fn postgres_store(_url: &SecretString, _max_connections: u32) -> anyhow::Result<Option<Repositories>> {
    warn!("database.url is set but postgres support is not compiled in; using the in-memory store");
    Ok(None)
}

fn build_limiters(
    settings: &Settings,
    clock: Arc<dyn Clock>,
    metrics: &Arc<Metrics>,
) -> anyhow::Result<(RateLimiters, Option<SweeperHandle>)> {
    let configs = settings.rate_limits.limiters();
    if let Some(url) = &settings.redis.url {
        if let Some(shared) = redis_limiters(url, configs, metrics)? {
            return Ok((shared, None));
        }
    }

    let (local, tables) = RateLimiters::in_memory(configs, clock);
    let metered = |name: LimiterName| MeteredRateLimit::wrap(local.get(name).clone(), name, metrics.clone());
    let limiters = RateLimiters::new(
        metered(LimiterName::General),
        metered(LimiterName::Booking),
        metered(LimiterName::Auth),
    );
    let sweeper = SweeperHandle::spawn(tables, Duration::from_millis(settings.rate_limits.sweep_interval_ms));
    Ok((limiters, Some(sweeper)))
}

#[cfg(feature = "redis")]
fn redis_limiters(
    url: &SecretString,
    configs: LimiterConfigs,
    metrics: &Arc<Metrics>,
) -> anyhow::Result<Option<RateLimiters>> {
    let pool = redis_limit::connect(url.expose_secret())?;
    let shared = |name: LimiterName| {
        let config = configs.get(name);
        let limiter: Arc<dyn domains::RateLimit> = Arc::new(RedisRateLimiter::new(
            pool.clone(),
            name.as_str(),
            config.window_ms,
            config.max_requests,
        ));
        MeteredRateLimit::wrap(limiter, name, metrics.clone())
    };
    info!("rate limits shared through redis");
    Ok(Some(RateLimiters::new(
        shared(LimiterName::General),
        shared(LimiterName::Booking),
        shared(LimiterName::Auth),
    )))
}

#[cfg(not(feature = "redis"))]
fn redis_limiters(
    _url: &SecretString,
    _configs: LimiterConfigs,
    _metrics: &Arc<Metrics>,
) -> anyhow::Result<Option<RateLimiters>> {
    warn!("redis.url is set but redis support is not compiled in; limiting in process");
    Ok(None)
}

fn build_identity(settings: &Settings, repos: &Repositories, clock: Arc<dyn Clock>) -> Arc<dyn IdentityProvider> {
    let ttl = settings.auth.session_ttl_minutes;
    if let Some(secret) = &settings.auth.jwt_secret {
        if let Some(jwt) = jwt_identity(secret, repos, clock.clone(), ttl) {
            return jwt;
        }
    }
    warn!("using in-memory sessions; logins do not survive a restart");
    Arc::new(SessionIdentityProvider::new(repos.accounts.clone(), clock, ttl))
}

#[cfg(feature = "auth-jwt")]
fn jwt_identity(
    secret: &SecretString,
    repos: &Repositories,
    clock: Arc<dyn Clock>,
    ttl: u32,
) -> Option<Arc<dyn IdentityProvider>> {
    info!("issuing signed session tokens");
    Some(Arc::new(JwtIdentityProvider::new(
        repos.accounts.clone(),
        clock,
        secret.expose_secret().as_bytes(),
        ttl,
    )))
}

#[cfg(not(feature = "auth-jwt"))]
fn jwt_identity(
    _secret: &SecretString,
    _repos: &Repositories,
    _clock: Arc<dyn Clock>,
    _ttl: u32,
) -> Option<Arc<dyn IdentityProvider>> {
    warn!("auth.jwt_secret is set but jwt support is not compiled in");
    None
}

fn build_notifier(settings: &Settings) -> anyhow::Result<Arc<dyn Notifier>> {
    match &settings.mail.relay_url {
        Some(url) => {
            let notifier = MailRelayNotifier::new(
                url.clone(),
                settings.mail.from_address.clone(),
                Duration::from_millis(settings.mail.timeout_ms),
            )?;
            info!(relay = %url, "notifications go through the mail relay");
            Ok(Arc::new(notifier))
        }
        None => {
            info!("no mail relay configured; notifications are logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
