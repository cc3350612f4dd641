use std::sync::Arc;

use log::{error, info, warn};
use study_hub::config::HubConfig;
use study_hub::store::{MemoryStore, SqliteStore, Store};
use study_hub::{routes, tls, Hub};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = HubConfig::from_env();
    info!("Starting study hub v{}", env!("CARGO_PKG_VERSION"));
    info!("{:?}", config);

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(SqliteStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL is not set, messages will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let hub = Arc::new(Hub::new(store, config.clone()));
    let routes = routes::routes(hub);

    match config.tls.as_ref().filter(|paths| tls::validate(paths)) {
        Some(paths) => {
            info!("Starting secure server (HTTPS/WSS) on {}", config.addr);
            let (_, server) = warp::serve(routes)
                .tls()
                .cert_path(&paths.cert)
                .key_path(&paths.key)
                .bind_with_graceful_shutdown(config.addr, shutdown_signal());
            server.await;
        }
        None => {
            if config.tls.is_some() {
                warn!("Failed to load TLS config, falling back to HTTP/WS");
            }
            let (addr, server) = warp::serve(routes)
                .try_bind_with_graceful_shutdown(config.addr, shutdown_signal())?;
            info!("Server listening on {}", addr);
            server.await;
        }
    }

    Ok(())
}
