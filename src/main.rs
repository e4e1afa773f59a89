use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;

use antrelay::api::dispatch_request;
use antrelay::auth::CredentialStore;
use antrelay::config::{self, AppConfig};
use antrelay::limit::GlobalLimiter;
use antrelay::observability::{init_tracing, mask_credential};
use antrelay::routing::RouteTable;
use antrelay::state::AppState;
use antrelay::transport::HttpTransport;

fn main() {
    init_tracing();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(run(config));
    tracing::info!("server exited cleanly");
}

async fn run(config: AppConfig) {
    let credentials = config::load_credentials(config::CREDENTIALS_FILE).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "failed to load credential table, continuing without it");
        Default::default()
    });
    if credentials.is_empty() {
        tracing::info!("no credential table, running in allow-all mode");
    } else {
        tracing::info!(keys = credentials.len(), "credential table loaded");
    }

    let routes = config::load_routes(config::ROUTES_FILE).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "failed to load route table, continuing without it");
        Vec::new()
    });
    if !routes.is_empty() {
        tracing::info!(routes = routes.len(), "model route table loaded");
    }

    if let Some(key) = config.default_api_key.as_deref() {
        tracing::info!(key = %mask_credential(key), "default upstream credential configured");
    }

    let global_limiter = GlobalLimiter::new(config.rate_limit_rpm);
    let bind_addr = config.bind_addr();
    let upstream_base = config.upstream_base.clone();

    let state = Arc::new(AppState::new(
        config,
        HttpTransport::new(),
        CredentialStore::new(credentials),
        RouteTable::new(routes),
        global_limiter,
    ));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {bind_addr}: {err}");
            std::process::exit(1);
        });

    tracing::info!(
        addr = %bind_addr,
        upstream = %upstream_base,
        "antrelay is ready to accept connections"
    );

    tokio::select! {
        () = serve_accept_loop(listener, state) => {}
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping accept loop");
        }
    }
}

async fn serve_accept_loop(listener: tokio::net::TcpListener, state: Arc<AppState>) {
    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "accept error");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let request_state = Arc::clone(&state);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(Arc::clone(&request_state), request.map(Body::new))
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, hyper_service).await {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
