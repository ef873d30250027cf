use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use labres::admission::ReservationAdmission;
use labres::clock::SystemClock;
use labres::config::Config;
use labres::observability;
use labres::store::DurableStore;
use labres::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;

    let tls = config
        .tls
        .as_ref()
        .map(labres::tls::load_tls_acceptor)
        .transpose()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(DurableStore::open(&config.wal_path())?);
    let admission = Arc::new(ReservationAdmission::new(store, Arc::new(SystemClock)));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("labres listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  tls: {}", if tls.is_some() { "enabled" } else { "disabled" });
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let connections = Arc::new(Semaphore::new(config.max_connections));
    serve(&listener, &config, admission, tls, &connections, shutdown_signal()?).await;
    drain(&connections, config.max_connections).await;

    info!("labres stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    Ok(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
        }
    })
}

/// Accept clients until `shutdown` fires. Each client holds one permit of
/// `connections` for its lifetime; clients past the limit are dropped at once.
async fn serve(
    listener: &TcpListener,
    config: &Config,
    admission: Arc<ReservationAdmission>,
    tls: Option<TlsAcceptor>,
    connections: &Arc<Semaphore>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, no longer accepting bookings");
                return;
            }
        };

        let Ok(permit) = connections.clone().try_acquire_owned() else {
            warn!("connection limit reached, turning away {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!("client connected from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);

        let admission = admission.clone();
        let password = config.password.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            if let Err(e) = wire::process_connection(socket, admission, password, tls).await {
                error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }
}

/// Wait until every client has gone, or `DRAIN_TIMEOUT` passes.
async fn drain(connections: &Semaphore, max_connections: usize) {
    info!("waiting for open connections to finish...");
    let all_permits = u32::try_from(max_connections).unwrap_or(u32::MAX);
    match tokio::time::timeout(DRAIN_TIMEOUT, connections.acquire_many(all_permits)).await {
        Ok(_) => info!("all connections closed"),
        Err(_) => {
            let open = max_connections - connections.available_permits();
            warn!("drain timeout, {open} connections still open");
        }
    }
}
