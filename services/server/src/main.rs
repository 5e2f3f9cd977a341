use std::env;
use std::path::PathBuf;

use im_core::{CoreConfig, CoreShared};
use server::{config, run_accept_loop, Db, SqliteUserStore};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config_path = env::var("IM_SERVER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/im-server/server.toml"));
    let server_config = if config_path.exists() {
        config::load_config_from_path(&config_path).expect("failed to load server config")
    } else {
        tracing::warn!(path = %config_path.display(), "config file not found, using defaults");
        config::load_config_from_str("").expect("default config must parse")
    };

    let db = Db::open(std::path::Path::new(&server_config.sqlite_path)).expect("failed to open database");
    let user_store = SqliteUserStore::new(db, server_config.group_id_boundary);

    let core_config: CoreConfig = server_config.to_core_config();
    let shared = CoreShared::new(core_config);

    let listener = TcpListener::bind(&server_config.bind_addr)
        .await
        .expect("failed to bind listener");
    tracing::info!(bind_addr = %server_config.bind_addr, "im-server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    run_accept_loop(listener, shared, user_store, shutdown_rx).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
