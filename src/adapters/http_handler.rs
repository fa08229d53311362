//! Axum router for the gateway: built-in JSON API, the admin surface, the
//! boot-time dynamic routes and the static fallback.
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Path, Request, State, rejection::JsonRejection},
    handler::HandlerWithoutStateExt,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{any, delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer, services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    adapters::middleware::{
        authenticate, cors, identify_client, rate_limit, record_metrics, request_id,
        require_master_key,
    },
    core::{
        GatewayService,
        endpoint_registry::NewEndpoint,
        error::{GatewayError, GatewayResult},
        metrics_collector::endpoint_name,
        monitor_registry::MonitorUpsert,
    },
    utils::client_ip::ClientIdentity,
};

/// State shared by every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayService>,
}

impl AppState {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }
}

/// Build the complete application router.
pub fn router(state: AppState) -> Router {
    let http = state.gateway.config().http.clone();

    let metrics = Router::new()
        .route("/api/server-metrics", get(server_metrics))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    let mut app = Router::new()
        .route("/", get(welcome))
        .route("/api/get-new-api-key", get(get_new_api_key))
        .route("/api/list-endpoints", get(list_endpoints))
        .route("/api/status-monitoring/list", get(list_monitors))
        .merge(metrics)
        .nest("/api/admin", admin_routes(&state));

    if let Some(dynamic) = dynamic_routes(&state) {
        app = app.merge(dynamic);
    }

    app = match &state.gateway.config().storage.public_dir {
        Some(public_dir) => app.fallback_service(
            ServeDir::new(public_dir).not_found_service(not_found.into_service()),
        ),
        None => app.fallback(not_found),
    };

    let mut app = app
        .layer(from_fn_with_state(state.clone(), record_metrics))
        .layer(from_fn_with_state(state.clone(), identify_client))
        .layer(DefaultBodyLimit::max(http.body_limit_bytes))
        // Extractors honour DefaultBodyLimit; proxied bodies stream through
        // untouched, so they are capped here.
        .layer(RequestBodyLimitLayer::new(http.body_limit_bytes))
        .layer(from_fn_with_state(state.clone(), cors))
        .layer(from_fn(request_id))
        .layer(TraceLayer::new_for_http());

    if http.compression {
        app = app.layer(CompressionLayer::new());
    }

    app.with_state(state)
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/toggle-visibility/{name}", post(toggle_endpoint_visibility))
        .route("/add-endpoint", post(add_endpoint))
        .route("/delete-endpoint/{name}", delete(delete_endpoint))
        .route("/get-script/{name}", get(get_script))
        .route("/save-script/{name}", post(save_script))
        .route("/get-json/{name}", get(get_json))
        .route("/save-json/{name}", post(save_json))
        .route("/status-monitoring/list-all", get(list_all_monitors))
        .route("/status-monitoring/add", post(add_monitor))
        .route("/status-monitoring/edit/{name}", post(edit_monitor))
        .route(
            "/status-monitoring/toggle-visibility/{name}",
            post(toggle_monitor_visibility),
        )
        .route("/status-monitoring/delete/{name}", delete(delete_monitor))
        .route_layer(from_fn_with_state(state.clone(), require_master_key))
}

/// One concrete route pair per loaded slug, authenticated then rate limited.
/// Slugs that did not load are left to the fallback.
fn dynamic_routes(state: &AppState) -> Option<Router<AppState>> {
    let slugs = state.gateway.route_slugs();
    if slugs.is_empty() {
        return None;
    }

    let mut router = Router::new();
    for slug in &slugs {
        router = router
            .route(&format!("/api/{slug}"), any(dispatch))
            .route(&format!("/api/{slug}/"), any(dispatch))
            .route(&format!("/api/{slug}/{{*rest}}"), any(dispatch));
    }
    Some(
        router
            .route_layer(from_fn_with_state(state.clone(), rate_limit))
            .route_layer(from_fn_with_state(state.clone(), authenticate)),
    )
}

async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let Some(handler) = endpoint_name(req.uri().path()).and_then(|slug| state.gateway.route(slug))
    else {
        return not_found().await.into_response();
    };
    match handler.handle(req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn not_found() -> GatewayError {
    GatewayError::NotFound("Not found.".to_string())
}

async fn welcome() -> &'static str {
    "Welcome to the API server"
}

async fn get_new_api_key(
    State(state): State<AppState>,
    Extension(client): Extension<ClientIdentity>,
) -> Json<Value> {
    let issued = state.gateway.key_store().lookup_or_create(client.as_str()).await;
    let message = if issued.created {
        "Your new API Key has been generated."
    } else {
        "Your existing API Key has been retrieved."
    };
    Json(json!({
        "success": true,
        "api_key": issued.record.api_key,
        "message": message,
    }))
}

async fn server_metrics(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.gateway.metrics().snapshot();
    Json(json!({ "success": true, "metrics": snapshot }))
}

async fn list_endpoints(State(state): State<AppState>) -> GatewayResult<Json<Value>> {
    let endpoints = state.gateway.endpoints().list().await?;
    Ok(Json(json!({ "success": true, "endpoints": endpoints })))
}

async fn list_monitors(State(state): State<AppState>) -> Json<Value> {
    let endpoints = state.gateway.monitors().list().await;
    Json(json!({ "success": true, "endpoints": endpoints }))
}

async fn toggle_endpoint_visibility(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<Value>> {
    let hidden = state.gateway.endpoints().toggle_visibility(&name).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Visibility for '{name}' changed. Please restart the server to apply it to the route."
        ),
        "newState": hidden,
    })))
}

async fn add_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<NewEndpoint>, JsonRejection>,
) -> GatewayResult<(StatusCode, Json<Value>)> {
    let Json(input) = payload?;
    let slug = state.gateway.endpoints().create(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!(
                "Endpoint '{slug}' created successfully. Please restart the server to activate the new route."
            ),
        })),
    ))
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<Value>> {
    let slug = state.gateway.endpoints().delete(&name).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Endpoint '{slug}' deleted successfully. Please restart the server."),
    })))
}

async fn get_script(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<Value>> {
    let script = state.gateway.endpoints().get_script(&name).await?;
    Ok(Json(json!({ "success": true, "script": script })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveScriptBody {
    script_content: Option<Value>,
}

async fn save_script(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<SaveScriptBody>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let Json(body) = payload?;
    let Some(Value::String(script)) = body.script_content else {
        return Err(GatewayError::Validation("scriptContent is missing.".to_string()));
    };
    let slug = state.gateway.endpoints().save_script(&name, &script).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Script for '{slug}' saved. Please restart server."),
    })))
}

async fn get_json(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<Value>> {
    let config = state.gateway.endpoints().get_config(&name).await?;
    Ok(Json(json!({ "success": true, "config": config })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveJsonBody {
    json_content: Option<Value>,
}

async fn save_json(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<SaveJsonBody>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let Json(body) = payload?;
    // Only a string can hold the document; anything else is rejected as malformed.
    let content = match body.json_content {
        Some(Value::String(content)) => content,
        _ => String::new(),
    };
    let slug = state.gateway.endpoints().save_config(&name, &content).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Config for '{slug}' saved successfully. Please restart the server."),
    })))
}

async fn list_all_monitors(State(state): State<AppState>) -> Json<Value> {
    let endpoints = state.gateway.monitors().list_all().await;
    Json(json!({ "success": true, "endpoints": endpoints }))
}

async fn add_monitor(
    State(state): State<AppState>,
    payload: Result<Json<MonitorUpsert>, JsonRejection>,
) -> GatewayResult<(StatusCode, Json<Value>)> {
    let Json(input) = payload?;
    let endpoint = state.gateway.monitors().add(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Status endpoint '{}' added successfully.", endpoint.name),
            "endpoint": endpoint,
        })),
    ))
}

async fn edit_monitor(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<MonitorUpsert>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let Json(input) = payload?;
    let endpoint = state.gateway.monitors().edit(&name, input).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Status endpoint '{name}' updated successfully."),
        "endpoint": endpoint,
    })))
}

async fn toggle_monitor_visibility(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<Value>> {
    let hidden = state.gateway.monitors().toggle_visibility(&name).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Status endpoint '{name}' visibility toggled."),
        "newState": hidden,
    })))
}

async fn delete_monitor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<Value>> {
    state.gateway.monitors().delete(&name).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Status endpoint '{name}' deleted successfully."),
    })))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request as HttpRequest, header},
    };
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServerConfig;

    const MASTER: &str = "master-key";

    async fn create_test_router(dir: &TempDir) -> Router {
        let mut config = ServerConfig {
            master_api_key: Some(MASTER.to_string()),
            ..ServerConfig::default()
        };
        config.storage.api_keys_file = dir.path().join("keys.json");
        config.storage.monitored_endpoints_file = dir.path().join("data/monitors.json");
        config.storage.routes_dir = dir.path().join("routes");
        config.storage.public_dir = Some(dir.path().join("public"));

        let gateway = GatewayService::open(Arc::new(config)).await.unwrap();
        router(AppState::new(Arc::new(gateway)))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_welcome_handler() {
        let dir = TempDir::new().unwrap();
        let app = create_test_router(&dir).await;

        let response = app
            .oneshot(HttpRequest::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"Welcome to the API server");
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_404() {
        let dir = TempDir::new().unwrap();
        let app = create_test_router(&dir).await;

        let response = app
            .oneshot(HttpRequest::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_admin_requires_master_key() {
        let dir = TempDir::new().unwrap();
        let app = create_test_router(&dir).await;

        let missing = app
            .clone()
            .oneshot(
                HttpRequest::get("/api/admin/status-monitoring/list-all")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(
                HttpRequest::get("/api/admin/status-monitoring/list-all")
                    .header(header::AUTHORIZATION, "Bearer not-the-master")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(wrong).await["message"],
            "Forbidden: Invalid master API key."
        );

        let ok = app
            .oneshot(
                HttpRequest::get("/api/admin/status-monitoring/list-all")
                    .header(header::AUTHORIZATION, format!("Bearer {MASTER}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_save_script_requires_string_content() {
        let dir = TempDir::new().unwrap();
        let app = create_test_router(&dir).await;

        let response = app
            .oneshot(
                HttpRequest::post("/api/admin/save-script/anything")
                    .header(header::AUTHORIZATION, format!("Bearer {MASTER}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"scriptContent": 42}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "scriptContent is missing.");
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let dir = TempDir::new().unwrap();
        let app = create_test_router(&dir).await;

        let response = app
            .oneshot(
                HttpRequest::post("/api/admin/add-endpoint")
                    .header(header::AUTHORIZATION, format!("Bearer {MASTER}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let dir = TempDir::new().unwrap();
        let app = create_test_router(&dir).await;

        let response = app
            .oneshot(
                HttpRequest::options("/api/server-metrics")
                    .header(header::ORIGIN, "https://status.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "https://status.example.com"
        );
    }
}
