mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod routes;
mod state;
#[cfg(test)]
mod test_support;

use std::{env, sync::OnceLock};

pub use app::Server;
use sentry_tracing::{EventFilter, SentryLayer};
pub use state::AppState;
use tracing::Level;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::{Layer as _, SubscriberExt},
    util::SubscriberInitExt,
};

static INIT_GUARD: OnceLock<sentry::ClientInitGuard> = OnceLock::new();

pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info,sqlx=warn".to_string());
    let fmt_layer = fmt::layer()
        .json()
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .boxed();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .with(sentry_layer())
        .init();
}

fn environment() -> &'static str {
    if cfg!(debug_assertions) {
        "dev"
    } else {
        "production"
    }
}

/// Enables Sentry reporting when `SENTRY_DSN` is set. Safe to call more than once.
pub fn sentry_init_once() {
    let Some(dsn) = env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty()) else {
        return;
    };

    INIT_GUARD.get_or_init(|| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(environment().into()),
                ..Default::default()
            },
        ))
    });

    sentry::configure_scope(|scope| {
        scope.set_tag("source", "twizio-auth");
    });
}

pub fn configure_user_scope(user_id: uuid::Uuid, provider: &str) {
    let sentry_user = sentry::User {
        id: Some(user_id.to_string()),
        ..Default::default()
    };

    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry_user));
        scope.set_tag("auth_provider", provider);
    });
}

fn sentry_layer<S>() -> SentryLayer<S>
where
    S: tracing::Subscriber,
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    SentryLayer::default()
        .span_filter(|meta| {
            matches!(
                *meta.level(),
                Level::DEBUG | Level::INFO | Level::WARN | Level::ERROR
            )
        })
        .event_filter(|meta| match *meta.level() {
            Level::ERROR => EventFilter::Event,
            Level::DEBUG | Level::INFO | Level::WARN => EventFilter::Breadcrumb,
            Level::TRACE => EventFilter::Ignore,
        })
}
