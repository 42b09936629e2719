use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use sqlx::PgPool;
use tracing::instrument;

use crate::{
    AppState,
    auth::{
        AuthService, CookieIssuer, GitHubOAuthProvider, GoogleOAuthProvider, ProviderRegistry,
        build_http_client,
    },
    clock::SystemClock,
    config::{ServerConfig, StoreBackend},
    db::{
        self,
        memory::{MemoryCredentialStore, MemorySessionCache},
        sessions::{SessionCache, SessionRepository},
        users::{CredentialStore, UserRepository},
    },
    routes,
};

pub struct Server;

impl Server {
    #[instrument(
        name = "auth_server",
        skip(config),
        fields(listen_addr = %config.listen_addr)
    )]
    pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
        let pool = match config.database_url.as_deref() {
            Some(url)
                if config.credential_store == StoreBackend::Postgres
                    || config.session_cache == StoreBackend::Postgres =>
            {
                let pool = db::create_pool(url)
                    .await
                    .context("failed to create postgres pool")?;
                db::migrate(&pool)
                    .await
                    .context("failed to run database migrations")?;
                Some(pool)
            }
            _ => None,
        };

        let users = credential_store(config.credential_store, pool.as_ref())?;
        let sessions = session_cache(config.session_cache, pool.as_ref())?;

        let http_client =
            build_http_client(config.auth.user_agent(), config.auth.http_timeout())
                .context("failed to create HTTP client")?;

        let mut registry = ProviderRegistry::new();

        if let Some(github) = config.auth.github() {
            registry.register(GitHubOAuthProvider::new(http_client.clone(), github)?);
        }

        if let Some(google) = config.auth.google() {
            registry.register(GoogleOAuthProvider::new(http_client.clone(), google)?);
        }

        if registry.is_empty() {
            bail!("no OAuth providers configured");
        }

        tracing::info!(providers = ?registry.names(), "OAuth providers registered");

        let auth = Arc::new(AuthService::new(
            Arc::new(registry),
            users,
            sessions,
            Arc::new(SystemClock),
            config.sessions.clone(),
            config.public_base_url.clone(),
        ));
        let cookies = Arc::new(CookieIssuer::new(config.cookies.clone()));

        let router = routes::router(AppState::new(auth, cookies, config.trust_forwarded_for));
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context("listen address is invalid")?;
        let tcp_listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind tcp listener")?;

        tracing::info!(%addr, "auth server listening");

        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(tcp_listener, make_service)
            .await
            .context("auth server failure")?;

        Ok(())
    }
}

fn credential_store(
    backend: StoreBackend,
    pool: Option<&PgPool>,
) -> anyhow::Result<Arc<dyn CredentialStore>> {
    match (backend, pool) {
        (StoreBackend::Postgres, Some(pool)) => Ok(Arc::new(UserRepository::new(pool.clone()))),
        (StoreBackend::Postgres, None) => bail!("postgres credential store requires a database"),
        (StoreBackend::Memory, _) => {
            tracing::warn!("credential store is in-memory; users are lost on restart");
            Ok(Arc::new(MemoryCredentialStore::new()))
        }
    }
}

fn session_cache(
    backend: StoreBackend,
    pool: Option<&PgPool>,
) -> anyhow::Result<Arc<dyn SessionCache>> {
    match (backend, pool) {
        (StoreBackend::Postgres, Some(pool)) => Ok(Arc::new(SessionRepository::new(pool.clone()))),
        (StoreBackend::Postgres, None) => bail!("postgres session cache requires a database"),
        (StoreBackend::Memory, _) => Ok(Arc::new(MemorySessionCache::new())),
    }
}
