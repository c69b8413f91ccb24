pub mod history;
mod messages;

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::auth::AuthManager;
use crate::config::MAX_WEBSOCKET_MESSAGE_SIZE;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::message::IncomingMessage;
use crate::metrics;
use crate::store::StoredMessage;

pub type WebSocketStreamType = WebSocketStream<TcpStream>;

/// Upgrades an accepted TCP socket to a WebSocket connection.
///
/// Identity is resolved during the handshake: the upgrade request must carry
/// a valid bearer token (Authorization header, or `token` query parameter for
/// clients that cannot set headers on WebSocket requests). Unauthenticated
/// upgrades are rejected with 401 before the ingestion loop ever starts.
pub async fn accept_connection(socket: TcpStream, addr: SocketAddr, ctx: AppContext) {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_WEBSOCKET_MESSAGE_SIZE);

    let mut authenticated: Option<String> = None;
    let auth = ctx.auth.clone();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match authenticate_upgrade(&auth, req) {
            Ok(user_id) => {
                authenticated = Some(user_id);
                Ok(resp)
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "Rejected unauthenticated WebSocket upgrade");
                let mut deny = ErrorResponse::new(Some("unauthorized".to_string()));
                *deny.status_mut() = StatusCode::UNAUTHORIZED;
                Err(deny)
            }
        }
    };

    let handshake = accept_hdr_async_with_config(socket, callback, Some(ws_config)).await;
    match handshake {
        Ok(ws_stream) => {
            let Some(user_id) = authenticated else {
                tracing::error!(%addr, "Handshake completed without an authenticated user");
                return;
            };
            handle_socket(ws_stream, addr, user_id, ctx).await;
        }
        Err(e) => {
            let err = AppError::from(e);
            tracing::debug!(%addr, error = %err, "WebSocket handshake failed");
        }
    }
}

fn authenticate_upgrade(auth: &AuthManager, req: &Request) -> AppResult<String> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(crate::auth::bearer_token)
        .or_else(|| token_from_query(req.uri().query()));

    let token = token.ok_or_else(|| AppError::auth("missing bearer token"))?;
    let claims = auth
        .verify_token(token)
        .map_err(|e| AppError::auth(e.to_string()))?;
    Ok(claims.sub)
}

fn token_from_query(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|token| !token.is_empty())
}

/// Ingestion loop: one instance per live connection, running until the
/// client closes, the transport errors, or shutdown is signalled.
///
/// Malformed inbound frames are protocol violations and close the
/// connection; skipping them silently would hide client bugs. A store
/// failure on a well-formed frame only drops that frame and keeps the
/// connection open.
pub async fn handle_socket(
    ws_stream: WebSocketStreamType,
    addr: SocketAddr,
    user_id: String,
    ctx: AppContext,
) {
    metrics::CONNECTIONS_TOTAL.inc();
    let span = tracing::info_span!("connection", %addr);
    let _enter = span.enter();

    tracing::info!(user_id = %user_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<StoredMessage>();

    // Subscribe before registering so a shutdown that fires right after
    // registration is never missed.
    let mut shutdown = ctx.shutdown.subscribe();
    ctx.registry.register(&user_id, &tx).await;

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = match serde_json::from_str::<IncomingMessage>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(error = %e, "Malformed inbound frame, closing connection");
                                break;
                            }
                        };

                        match messages::process_frame(ctx.store.as_ref(), &ctx.registry, &user_id, frame).await {
                            Ok(stored) => {
                                metrics::MESSAGES_INGESTED_TOTAL.inc();
                                if ctx.config.logging.enable_message_metadata {
                                    tracing::debug!(
                                        message_id = %stored.id,
                                        sender = %stored.sender,
                                        receiver = %stored.receiver,
                                        "Inbound message persisted"
                                    );
                                } else {
                                    tracing::debug!(message_id = %stored.id, "Inbound message persisted");
                                }
                            }
                            Err(AppError::Validation(reason)) => {
                                tracing::warn!(reason = %reason, "Invalid inbound frame, closing connection");
                                break;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to persist inbound message, frame dropped");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::info!("Connection closed by client");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = AppError::from(e);
                        tracing::warn!(error = %err, "WebSocket read error");
                        break;
                    }
                    None => break,
                }
            }

            delivery = rx.recv() => {
                // The registry and this task hold the only senders, so recv()
                // yields None only during teardown.
                let Some(message) = delivery else { break };
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize outbound message");
                    }
                }
            }

            _ = shutdown.recv() => {
                tracing::info!("Shutdown signal received, closing connection");
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    // Complete the close handshake so the peer sees a Close frame rather
    // than a dropped TCP stream; a no-op when one was already sent.
    let _ = ws_sender.close().await;

    ctx.registry.unregister(&user_id, &tx).await;
    tracing::info!(user_id = %user_id, "Connection closed");
}
