use twizio_auth::{Server, config::ServerConfig, init_tracing, sentry_init_once};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    sentry_init_once();
    init_tracing();

    let config = ServerConfig::from_env()?;
    Server::run(config).await
}
