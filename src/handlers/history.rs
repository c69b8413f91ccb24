use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming as IncomingBody;
use hyper::{Request, Response};
use serde_json::json;

use crate::auth::bearer_token;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::store::{ChatStore, StoredMessage};

pub const HISTORY_PATH_PREFIX: &str = "/api/v1/messages/";

/// Conversation history between the caller and one peer, ascending by send
/// time. A pair with no shared channel yet yields an empty list, not an
/// error, and the lookup never creates a channel.
pub async fn conversation(
    store: &dyn ChatStore,
    caller: &str,
    peer: &str,
) -> AppResult<Vec<StoredMessage>> {
    let Some(channel) = store.channel_for_pair(caller, peer).await? else {
        return Ok(Vec::new());
    };
    Ok(store.messages_for_channel(channel.id).await?)
}

/// `GET /api/v1/messages/{peer_id}` with a bearer token identifying the
/// caller.
pub async fn handle_history(
    req: &Request<IncomingBody>,
    ctx: &AppContext,
) -> AppResult<Response<Full<Bytes>>> {
    if req.method() != hyper::Method::GET {
        return Err(AppError::validation("history endpoint only supports GET"));
    }

    let token = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| AppError::auth("missing bearer token"))?;
    let claims = ctx
        .auth
        .verify_token(token)
        .map_err(|e| AppError::auth(e.to_string()))?;

    let peer = req
        .uri()
        .path()
        .strip_prefix(HISTORY_PATH_PREFIX)
        .unwrap_or_default();
    if peer.is_empty() {
        return Err(AppError::validation("missing peer id in path"));
    }

    let messages = conversation(ctx.store.as_ref(), &claims.sub, peer).await?;

    let body = serde_json::to_vec(&json!({ "messages": messages }))?;
    let mut response = Response::new(Full::new(Bytes::from(body)));
    response.headers_mut().insert(
        "content-type",
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}
