use crate::cache::{AssetError, AssetRequest, AssetResponse};
use crate::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::{
    Router,
    body::Body,
    extract::{State, WebSocketUpgrade},
    http::{HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use hcsim_proto::ClientMessage;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use url::Url;

/// Headers that describe one hop and must not be replayed from the cache
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/ws/client", get(handle_websocket_client))
        .fallback(handle_intercept)
        .layer(CorsLayer::permissive()) // Host pages may live on another origin
        .with_state(state)
}

/// Map an intercepted request target onto the upstream, keeping the upstream's path prefix
fn upstream_url(upstream: &Url, uri: &Uri) -> Result<Url, String> {
    let mut base = upstream.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let mut relative = uri.path().trim_start_matches('/').to_string();
    if let Some(query) = uri.query() {
        relative.push('?');
        relative.push_str(query);
    }

    let url = base.join(&relative).map_err(|e| e.to_string())?;
    if url.origin() != upstream.origin() {
        return Err(format!("{} leaves the upstream origin", url));
    }
    Ok(url)
}

async fn handle_intercept(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let url = match upstream_url(&state.upstream, &uri) {
        Ok(url) => url,
        Err(e) => {
            warn!("Rejecting intercepted request for {}: {}", uri, e);
            return (StatusCode::BAD_REQUEST, "Invalid request path").into_response();
        }
    };
    let request = AssetRequest::new(method.as_str(), url.as_str());

    match state.worker.handle_fetch(&request).await {
        Ok(response) => into_http_response(response),
        Err(e @ AssetError::Fetch { .. }) => {
            warn!("❌ Fetch failed for {}: {}", request, e);
            (StatusCode::BAD_GATEWAY, format!("Failed to fetch {}", request.url)).into_response()
        }
        Err(e) => {
            error!("❌ Failed to serve {}: {}", request, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Cache unavailable").into_response()
        }
    }
}

fn into_http_response(response: AssetResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = status;

    let headers = http.headers_mut();
    for (name, value) in &response.headers {
        if HOP_BY_HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Dropping unrepresentable header {}", name),
        }
    }
    http
}

async fn handle_websocket_client(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("📡 WebSocket upgrade request for /ws/client");
    ws.on_upgrade(move |socket| handle_client_socket(socket, state))
}

async fn handle_client_socket(socket: WebSocket, state: AppState) {
    let (client_id, mut outgoing) = match state.worker.connect_client() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to register host page: {}", e);
            return;
        }
    };
    info!("🔌 Host page {} connected", client_id);

    let (mut sender, mut receiver) = socket.split();

    // Broadcasts queued for this page go out as JSON text frames
    let forward_task = tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode broadcast: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match ClientMessage::parse(text.as_str()) {
                Some(command) => {
                    debug!("Host page {} sent {:?}", client_id, command);
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = state.worker.handle_message(command).await {
                            error!("❌ Command from {} failed: {}", client_id, e);
                        }
                    });
                }
                None => debug!("Ignoring malformed message from {}", client_id),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("WebSocket error from {}: {}", client_id, e);
                break;
            }
            _ => {}
        }
    }

    if let Err(e) = state.worker.clients().disconnect(&client_id) {
        error!("Failed to unregister host page {}: {}", client_id, e);
    }
    let _ = forward_task.await;
    info!("🔌 Host page {} disconnected", client_id);
}
