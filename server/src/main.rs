use hcsim_server::bundles::BundleRegistry;
use hcsim_server::cache::fetcher::HttpFetcher;
use hcsim_server::cache::memory::MemoryCacheStorage;
use hcsim_server::cache::sqlite::SqliteCacheStorage;
use hcsim_server::config::{Config, StoreKind};
use hcsim_server::{AgentState, CacheStorage, CacheStore, Worker, server};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tower::Service;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hcsim_server=debug".into()),
        )
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let storage: Arc<dyn CacheStorage> = match config.store {
        StoreKind::Sqlite => {
            std::fs::create_dir_all(&config.storage_dir)
                .expect("Failed to create storage directory");
            Arc::new(
                SqliteCacheStorage::new(config.database_path())
                    .expect("Failed to initialize cache storage"),
            )
        }
        StoreKind::Memory => Arc::new(MemoryCacheStorage::new()),
    };

    let registry = match &config.manifest {
        Some(path) => BundleRegistry::from_path(path, &config.upstream)
            .expect("Failed to load bundle manifest"),
        None => {
            warn!("HCSIM_MANIFEST not set, no bundles can be downloaded");
            BundleRegistry::new(BTreeMap::new())
        }
    };

    let fetcher = HttpFetcher::new(config.fetch_timeout).expect("Failed to build HTTP client");
    let store = CacheStore::new(storage, config.version.clone());
    let worker = Worker::new(store, Arc::new(fetcher), registry);

    // Never wait for an older instance: install and activate straight away
    worker.install().expect("Install failed");
    worker.activate().await.expect("Activation failed");

    let state = Arc::new(AgentState::new(worker, config.upstream.clone()));
    let app = server::create_app(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .expect("Failed to bind listen address");
    info!(
        "Hcsim cache agent listening on http://{} (HTTP/1.1 + HTTP/2)",
        config.listen
    );
    info!(
        "Upstream: {}, cache version: {}, store: {:?}",
        config.upstream, config.version, config.store
    );

    // Use hyper's auto-negotiating server to support both HTTP/1.1 and HTTP/2
    let conn_builder = ConnBuilder::new(hyper_util::rt::TokioExecutor::new());

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };
        debug!("New connection from: {}", addr);
        let io = TokioIo::new(stream);
        let app_clone = app.clone();
        let conn_builder = conn_builder.clone();

        tokio::spawn(async move {
            if let Err(err) = conn_builder
                .serve_connection_with_upgrades(
                    io,
                    hyper::service::service_fn(move |req| app_clone.clone().call(req)),
                )
                .await
            {
                // Check if the error is an io::Error indicating a normal close
                let is_normal_close = err
                    .source()
                    .and_then(|e| e.downcast_ref::<io::Error>())
                    .map(|io_err| {
                        matches!(
                            io_err.kind(),
                            io::ErrorKind::ConnectionReset
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::UnexpectedEof
                        )
                    })
                    .unwrap_or(false);

                if is_normal_close {
                    debug!("Connection from {} closed normally", addr);
                } else {
                    error!("Error serving connection from {}: {}", addr, err);
                }
            } else {
                debug!("Connection from {} completed successfully", addr);
            }
        });
    }
}
