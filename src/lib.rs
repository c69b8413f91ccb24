use bytes::Bytes;
use http_body_util::Full;
use std::convert::Infallible;
use std::sync::Arc;

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming as IncomingBody, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod health;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod store;

use auth::AuthManager;
use config::{Config, SHUTDOWN_DRAIN_TIMEOUT_SECS};
use context::AppContext;
use handlers::history;
use registry::ConnectionRegistry;
use store::{ChatStore, DbPool, PgStore};

type HttpResult = Result<Response<Full<Bytes>>, Infallible>;

async fn http_handler(
    req: Request<IncomingBody>,
    ctx: AppContext,
    db_pool: Arc<DbPool>,
) -> HttpResult {
    let path = req.uri().path().to_string();
    let response = match path.as_str() {
        "/health" => match health::health_check(&db_pool).await {
            Ok(_) => Response::new(Full::new(Bytes::from("OK"))),
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Service Unavailable")));
                *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                res
            }
        },
        "/metrics" => match metrics::gather_metrics() {
            Ok(metrics_data) => {
                let mut res = Response::new(Full::new(Bytes::from(metrics_data)));
                res.headers_mut().insert(
                    "Content-Type",
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                res
            }
            Err(e) => {
                tracing::error!("Failed to gather metrics: {}", e);
                let mut res = Response::new(Full::new(Bytes::from("Internal Server Error")));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        },
        p if p.starts_with(history::HISTORY_PATH_PREFIX) => {
            match history::handle_history(&req, &ctx).await {
                Ok(resp) => resp,
                Err(e) => e.to_hyper_response(),
            }
        }
        _ => {
            let mut not_found = Response::new(Full::new(Bytes::from("Not Found")));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            not_found
        }
    };
    Ok(response)
}

pub async fn run_http_server(
    config: Arc<Config>,
    ctx: AppContext,
    db_pool: Arc<DbPool>,
) -> anyhow::Result<()> {
    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP server listening on http://{}", http_addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let ctx_clone = ctx.clone();
        let db_pool_clone = db_pool.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                http_handler(req, ctx_clone.clone(), db_pool_clone.clone())
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Error serving HTTP connection: {:?}", err);
            }
        });
    }
}

/// Accepts WebSocket connections until the shutdown broadcast fires, then
/// drains: every connection task gets a bounded window to flush its Close
/// frame before the remainder is aborted.
pub async fn run_websocket_server(ctx: AppContext, listener: TcpListener) {
    let mut shutdown = ctx.shutdown.subscribe();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        let ctx = ctx.clone();
                        connections.spawn(async move {
                            handlers::accept_connection(socket, addr, ctx).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept socket: {}", e);
                    }
                }
            }

            // Reap finished connection tasks so the set stays bounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            _ = shutdown.recv() => break,
        }
    }

    tracing::info!(open = connections.len(), "Stopped accepting connections, draining");
    let drained = tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_DRAIN_TIMEOUT_SECS),
        async { while connections.join_next().await.is_some() {} },
    )
    .await
    .is_ok();

    if !drained {
        tracing::warn!("Drain timed out, aborting remaining connection tasks");
        connections.abort_all();
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Connect to database
    let db_pool = Arc::new(store::create_pool(&config.database_url, &config.db).await?);
    tracing::info!("Connected to database");

    // Apply database migrations
    tracing::info!("Applying database migrations...");
    sqlx::migrate!().run(&*db_pool).await?;
    tracing::info!("Database migrations applied successfully.");

    let chat_store: Arc<dyn ChatStore> = Arc::new(PgStore::new((*db_pool).clone()));
    let conn_registry = Arc::new(ConnectionRegistry::new());
    let auth_manager = Arc::new(AuthManager::new(&config));

    // Shutdown signal fan-out to every open connection task
    let (shutdown_tx, _) = broadcast::channel(1);

    // WebSocket listener
    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("Reclaim chat server listening on {} (WebSocket)", bind_address);

    let ctx = AppContext::new(
        chat_store,
        conn_registry,
        auth_manager,
        config.clone(),
        shutdown_tx.clone(),
    );

    let websocket_server = run_websocket_server(ctx.clone(), listener);
    tokio::pin!(websocket_server);
    let http_server = run_http_server(config.clone(), ctx, db_pool.clone());

    tokio::select! {
        _ = &mut websocket_server => {
            tracing::info!("WebSocket server shut down.");
        },
        res = http_server => {
            if let Err(e) = res {
                tracing::error!("HTTP server failed: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Closing open connections...");
            let _ = shutdown_tx.send(());
            // Let every connection task flush its Close frame before the
            // runtime tears down
            websocket_server.await;
            tracing::info!("All connections drained.");
        }
    }

    Ok(())
}
