use std::{net::SocketAddr, sync::Arc};

use pmd::{
    backend_config_from_env, dashboard_router, dashboard_server_config_from_env, init_logging,
    log_app_bind, log_app_start, log_backend_selected, logging_config_from_env,
    DashboardServerConfig, FeedTransport, HttpBackend, InMemoryFeedTransport, KeyValueStore,
    MemoryStore, SqliteStore,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let server_cfg = dashboard_server_config_from_env();
    let addr: SocketAddr = server_cfg.addr.parse()?;

    // Built and finally dropped outside the runtime: the HTTP backend wraps a blocking client.
    let transport = transport_from_config(&server_cfg)?;
    let store: Arc<dyn KeyValueStore> = match &server_cfg.storage_path {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(addr, transport.clone(), store, &server_cfg))?;
    drop(runtime);
    drop(transport);

    Ok(())
}

async fn serve(
    addr: SocketAddr,
    transport: Arc<dyn FeedTransport>,
    store: Arc<dyn KeyValueStore>,
    cfg: &DashboardServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = dashboard_router(transport, store, cfg.dashboard());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn transport_from_config(
    cfg: &DashboardServerConfig,
) -> Result<Arc<dyn FeedTransport>, Box<dyn std::error::Error>> {
    if cfg.use_demo {
        log_backend_selected("demo", Some("PMD_DASHBOARD_USE_DEMO"), None);
        return Ok(Arc::new(InMemoryFeedTransport::demo()));
    }

    let backend_cfg = backend_config_from_env();
    log_backend_selected("http", None, Some(&backend_cfg.base_url));
    Ok(Arc::new(HttpBackend::new(backend_cfg)?))
}
