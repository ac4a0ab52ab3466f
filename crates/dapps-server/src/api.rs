use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use dapps_shared::protocol::is_valid_property;
use dapps_store::{Message, Neighbour, RouteHint, SharedDatabase, SystemOptions};

use crate::config::ServerConfig;
use crate::delivery::{DeliveryManager, SweepReport};
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedDatabase,
    pub delivery: Arc<DeliveryManager>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    // JSON string escaping can grow a payload considerably
    let body_limit = state.config.max_payload_len.saturating_mul(6).max(64 * 1024);

    Router::new()
        .route("/health", get(health_check))
        .route("/message", post(post_message))
        .route("/message/dorun", post(run_sweep))
        .route("/messages", get(list_messages))
        .route("/config", get(get_config).post(set_config))
        .route("/routes", get(list_routes).post(upsert_route))
        .route("/routes/:destination", delete(delete_route))
        .route("/neighbours", get(list_neighbours).post(upsert_neighbour))
        .route("/neighbours/:callsign", delete(delete_neighbour))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PostMessageRequest {
    destination: String,
    payload: String,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct PostMessageResponse {
    id: String,
}

async fn post_message(
    State(state): State<AppState>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<PostMessageResponse>), ServerError> {
    let destination = req.destination.trim();
    if destination.is_empty() || destination.contains(char::is_whitespace) {
        return Err(ServerError::BadRequest(
            "destination must be a single non-empty word".into(),
        ));
    }
    if req.payload.is_empty() {
        return Err(ServerError::BadRequest("payload must not be empty".into()));
    }
    let max = state.config.max_payload_len;
    if req.payload.len() > max {
        return Err(ServerError::PayloadTooLarge {
            size: req.payload.len(),
            max,
        });
    }
    if let Some((key, value)) = req
        .properties
        .iter()
        .find(|(k, v)| !is_valid_property(k, v))
    {
        return Err(ServerError::BadRequest(format!(
            "invalid property {key}={value}"
        )));
    }

    let message = Message::compose(
        destination,
        req.payload.into_bytes(),
        Some(Utc::now().timestamp_millis()),
        req.properties,
    );
    let created = state.store.with(|db| db.save_message(&message))?;
    if created {
        info!(id = %message.id, dst = %message.destination, "message queued");
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(PostMessageResponse { id: message.id })))
}

async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ServerError> {
    let report = state
        .delivery
        .run_sweep()
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(Json(report))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView {
    id: String,
    destination: String,
    timestamp: Option<i64>,
    properties: BTreeMap<String, String>,
    forwarded: bool,
    created_at: DateTime<Utc>,
    payload: String,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            payload: String::from_utf8_lossy(&m.payload).into_owned(),
            id: m.id,
            destination: m.destination,
            timestamp: m.timestamp,
            properties: m.extra_properties,
            forwarded: m.forwarded,
            created_at: m.created_at,
        }
    }
}

async fn list_messages(State(state): State<AppState>) -> Result<Json<Vec<MessageView>>, ServerError> {
    let messages = state.store.with(|db| db.list_messages())?;
    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

// ---------------------------------------------------------------------------
// Node options
// ---------------------------------------------------------------------------

async fn get_config(State(state): State<AppState>) -> Result<Json<SystemOptions>, ServerError> {
    Ok(Json(state.store.with(|db| db.get_system_options())?))
}

async fn set_config(
    State(state): State<AppState>,
    Json(options): Json<SystemOptions>,
) -> Result<Json<SystemOptions>, ServerError> {
    if options.callsign.trim().is_empty() || options.node_host.trim().is_empty() {
        return Err(ServerError::BadRequest(
            "callsign and nodeHost are required".into(),
        ));
    }
    state.store.with(|db| db.save_system_options(&options))?;
    info!(callsign = %options.callsign, node = %options.node_host, "system options updated");
    Ok(Json(options))
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

async fn list_routes(State(state): State<AppState>) -> Result<Json<Vec<RouteHint>>, ServerError> {
    Ok(Json(state.store.with(|db| db.list_route_hints())?))
}

async fn upsert_route(
    State(state): State<AppState>,
    Json(hint): Json<RouteHint>,
) -> Result<Json<RouteHint>, ServerError> {
    if hint.destination.trim().is_empty() || hint.next_hop.trim().is_empty() {
        return Err(ServerError::BadRequest(
            "destination and nextHop are required".into(),
        ));
    }
    state.store.with(|db| db.upsert_route_hint(&hint))?;
    Ok(Json(hint))
}

async fn delete_route(
    State(state): State<AppState>,
    Path(destination): Path<String>,
) -> Result<StatusCode, ServerError> {
    if state.store.with(|db| db.delete_route_hint(&destination))? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::NotFound(format!("route {destination}")))
    }
}

async fn list_neighbours(
    State(state): State<AppState>,
) -> Result<Json<Vec<Neighbour>>, ServerError> {
    Ok(Json(state.store.with(|db| db.list_neighbours())?))
}

async fn upsert_neighbour(
    State(state): State<AppState>,
    Json(neighbour): Json<Neighbour>,
) -> Result<Json<Neighbour>, ServerError> {
    if neighbour.callsign.trim().is_empty() {
        return Err(ServerError::BadRequest("callsign is required".into()));
    }
    if neighbour.connect_script.iter().any(|l| l.contains(['\r', '\n'])) {
        return Err(ServerError::BadRequest(
            "connect script lines must not contain line breaks".into(),
        ));
    }
    state.store.with(|db| db.upsert_neighbour(&neighbour))?;
    Ok(Json(neighbour))
}

async fn delete_neighbour(
    State(state): State<AppState>,
    Path(callsign): Path<String>,
) -> Result<StatusCode, ServerError> {
    if state.store.with(|db| db.delete_neighbour(&callsign))? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::NotFound(format!("neighbour {callsign}")))
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use dapps_store::Database;
    use tower::ServiceExt;

    use super::*;
    use crate::gateway::BpqGateway;

    fn state() -> AppState {
        let store = SharedDatabase::new(Database::open_in_memory().unwrap());
        let delivery = DeliveryManager::new(store.clone(), BpqGateway::new(Duration::from_millis(100)), None);
        AppState {
            store,
            delivery: Arc::new(delivery),
            config: Arc::new(ServerConfig::default()),
        }
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&state(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_post_message_then_list() {
        let state = state();
        let (status, body) = call(
            &state,
            "POST",
            "/message",
            Some(serde_json::json!({
                "destination": "testqueue@gb7rdg",
                "payload": "hello world",
                "properties": {"app": "chat"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 7);

        let (status, body) = call(&state, "GET", "/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], id.as_str());
        assert_eq!(body[0]["payload"], "hello world");
        assert_eq!(body[0]["properties"]["app"], "chat");
        assert_eq!(body[0]["forwarded"], false);
    }

    #[tokio::test]
    async fn test_post_message_validation() {
        let state = state();
        let (status, body) = call(
            &state,
            "POST",
            "/message",
            Some(serde_json::json!({"destination": "", "payload": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(
            &state,
            "POST",
            "/message",
            Some(serde_json::json!({
                "destination": "q@SYS1",
                "payload": "x",
                "properties": {"len": "5"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let state = state();
        let (_, body) = call(&state, "GET", "/config", None).await;
        assert_eq!(body["callsign"], "N0CALL");
        assert_eq!(body["fbbPort"], 8011);

        let mut updated = body.clone();
        updated["callsign"] = "GB7RDG".into();
        let (status, _) = call(&state, "POST", "/config", Some(updated)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&state, "GET", "/config", None).await;
        assert_eq!(body["callsign"], "GB7RDG");
    }

    #[tokio::test]
    async fn test_routes_and_neighbours() {
        let state = state();
        let (status, _) = call(
            &state,
            "POST",
            "/neighbours",
            Some(serde_json::json!({"callsign": "NODE2", "connectScript": ["C NODE2", "PAUSE 100"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &state,
            "POST",
            "/routes",
            Some(serde_json::json!({"destination": "SYS1", "nextHop": "NODE2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, routes) = call(&state, "GET", "/routes", None).await;
        assert_eq!(routes[0]["nextHop"], "NODE2");
        let (_, neighbours) = call(&state, "GET", "/neighbours", None).await;
        assert_eq!(neighbours[0]["connectScript"][1], "PAUSE 100");

        let (status, _) = call(&state, "DELETE", "/routes/SYS1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&state, "DELETE", "/routes/SYS1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&state, "DELETE", "/neighbours/node2", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_dorun_with_nothing_pending() {
        let (status, body) = call(&state(), "POST", "/message/dorun", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], 0);
        assert_eq!(body["forwarded"], 0);
    }
}
