use std::{collections::HashMap, fmt, sync::Arc};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

pub const API_VERSION_HEADER: &str = "x-broker-api-version";
pub const SERVICE_ID: &str = "mock-db-service";
pub const SMALL_PLAN_ID: &str = "mock-db-small";
pub const LARGE_PLAN_ID: &str = "mock-db-large";

/// How the broker answers state-changing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    /// 201/200 immediately.
    Sync,
    /// 202, then `polls` "in progress" answers before "succeeded".
    Async { polls: u32 },
}

impl BrokerMode {
    /// Accepts `sync`, `async` or `async:<polls>`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split_once(':') {
            None if raw == "sync" => Some(BrokerMode::Sync),
            None if raw == "async" => Some(BrokerMode::Async { polls: 1 }),
            Some(("async", polls)) => polls.parse().ok().map(|polls| BrokerMode::Async { polls }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub username: String,
    pub password: String,
    pub mode: BrokerMode,
    /// Answer 202 without an `operation` token.
    pub omit_operation_token: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "secret".to_string(),
            mode: BrokerMode::Sync,
            omit_operation_token: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ProvisionBody {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub organization_guid: Option<String>,
    #[serde(default)]
    pub space_guid: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BindBody {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub app_guid: Option<String>,
    #[serde(default)]
    pub bind_resource: Option<Value>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingKind {
    Provision,
    Deprovision,
    Bind,
    Unbind,
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PendingKind::Provision => "provision",
            PendingKind::Deprovision => "deprovision",
            PendingKind::Bind => "bind",
            PendingKind::Unbind => "unbind",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
struct Pending {
    kind: PendingKind,
    token: String,
    remaining: u32,
}

/// Instance id, plus binding id for binding-scoped operations.
type Target = (String, Option<String>);

#[derive(Default)]
struct Store {
    instances: HashMap<String, ProvisionBody>,
    bindings: HashMap<(String, String), BindBody>,
    operations: HashMap<Target, Pending>,
}

impl Store {
    fn begin(&mut self, target: Target, kind: PendingKind, polls: u32) -> String {
        let token = format!("{kind}-{}", Uuid::new_v4());
        debug!(?target, %kind, %token, "operation accepted");
        self.operations.insert(
            target,
            Pending {
                kind,
                token: token.clone(),
                remaining: polls,
            },
        );
        token
    }

    fn exists(&self, target: &Target) -> bool {
        match target {
            (instance_id, None) => self.instances.contains_key(instance_id),
            (instance_id, Some(binding_id)) => self
                .bindings
                .contains_key(&(instance_id.clone(), binding_id.clone())),
        }
    }

    fn in_flight(&self, target: &Target, kind: PendingKind) -> bool {
        self.operations.get(target).is_some_and(|p| p.kind == kind)
    }

    fn remove_instance(&mut self, instance_id: &str) {
        self.instances.remove(instance_id);
        self.bindings.retain(|(i, _), _| i != instance_id);
    }

    fn poll(&mut self, target: Target, token: Option<&str>) -> Response {
        let Some(pending) = self.operations.get_mut(&target) else {
            return if self.exists(&target) {
                (StatusCode::OK, Json(json!({"state": "succeeded"}))).into_response()
            } else {
                gone()
            };
        };
        if token.is_some_and(|t| t != pending.token) {
            return error(StatusCode::BAD_REQUEST, "UnknownOperation", "operation token does not match");
        }
        if pending.remaining > 0 {
            pending.remaining -= 1;
            let description = format!("{} in progress", pending.kind);
            return (
                StatusCode::OK,
                Json(json!({"state": "in progress", "description": description})),
            )
                .into_response();
        }

        let kind = pending.kind;
        self.operations.remove(&target);
        debug!(?target, %kind, "operation finished");
        match (kind, &target) {
            (PendingKind::Deprovision, (instance_id, _)) => self.remove_instance(instance_id),
            (PendingKind::Unbind, (instance_id, Some(binding_id))) => {
                self.bindings.remove(&(instance_id.clone(), binding_id.clone()));
            }
            _ => {}
        }
        (StatusCode::OK, Json(json!({"state": "succeeded"}))).into_response()
    }
}

pub struct MockBroker {
    settings: Settings,
    store: RwLock<Store>,
}

impl MockBroker {
    fn accepted(&self, token: String) -> Response {
        let body = if self.settings.omit_operation_token {
            json!({})
        } else {
            json!({ "operation": token })
        };
        (StatusCode::ACCEPTED, Json(body)).into_response()
    }
}

pub type Shared = Arc<MockBroker>;

pub fn app() -> Router {
    app_with(Settings::default())
}

pub fn app_with(settings: Settings) -> Router {
    let broker: Shared = Arc::new(MockBroker {
        settings,
        store: RwLock::new(Store::default()),
    });
    Router::new()
        .route("/v2/catalog", get(catalog))
        .route(
            "/v2/service_instances/{instance_id}",
            get(get_instance).put(provision).delete(deprovision),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(instance_last_operation),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
            get(get_binding).put(bind).delete(unbind),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}/last_operation",
            get(binding_last_operation),
        )
        .layer(middleware::from_fn_with_state(broker.clone(), check_headers))
        .with_state(broker)
}

pub async fn run(listener: TcpListener, settings: Settings) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(settings)).await
}

fn error(status: StatusCode, code: &str, description: &str) -> Response {
    (status, Json(json!({"error": code, "description": description}))).into_response()
}

fn gone() -> Response {
    (StatusCode::GONE, Json(json!({}))).into_response()
}

fn async_required() -> Response {
    error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "AsyncRequired",
        "This service plan requires client support for asynchronous service operations.",
    )
}

fn accepts_incomplete(query: &HashMap<String, String>) -> bool {
    query.get("accepts_incomplete").is_some_and(|v| v == "true")
}

fn has_correlation(query: &HashMap<String, String>) -> bool {
    query.contains_key("service_id") && query.contains_key("plan_id")
}

fn credentials(instance_id: &str, binding_id: &str) -> Value {
    json!({
        "uri": format!("mockdb://{binding_id}@mock-db/{instance_id}"),
        "username": binding_id,
    })
}

async fn check_headers(State(broker): State<Shared>, request: Request, next: Next) -> Response {
    let headers = request.headers();
    if !headers.contains_key(API_VERSION_HEADER) {
        return error(
            StatusCode::PRECONDITION_FAILED,
            "MissingApiVersion",
            "X-Broker-Api-Version header is required",
        );
    }
    let expected = format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", broker.settings.username, broker.settings.password))
    );
    let presented = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if presented != Some(expected.as_str()) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized", "invalid broker credentials");
    }
    next.run(request).await
}

async fn catalog() -> Json<Value> {
    Json(json!({
        "services": [{
            "id": SERVICE_ID,
            "name": "mock-db",
            "description": "In-memory database for broker client tests",
            "bindable": true,
            "tags": ["mock", "database"],
            "bindings_retrievable": true,
            "plans": [
                {"id": SMALL_PLAN_ID, "name": "small", "description": "One node", "free": true},
                {"id": LARGE_PLAN_ID, "name": "large", "description": "Three nodes", "free": false}
            ]
        }]
    }))
}

async fn provision(
    State(broker): State<Shared>,
    Path(instance_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<ProvisionBody>,
) -> Response {
    let mut store = broker.store.write().await;
    if let Some(existing) = store.instances.get(&instance_id) {
        return if *existing == body {
            (StatusCode::OK, Json(json!({}))).into_response()
        } else {
            error(StatusCode::CONFLICT, "Conflict", "instance exists with different attributes")
        };
    }
    let dashboard_url = format!("http://mock-db/dashboard/{instance_id}");
    match broker.settings.mode {
        BrokerMode::Sync => {
            store.instances.insert(instance_id, body);
            (StatusCode::CREATED, Json(json!({"dashboard_url": dashboard_url}))).into_response()
        }
        BrokerMode::Async { polls } => {
            if !accepts_incomplete(&query) {
                return async_required();
            }
            store.instances.insert(instance_id.clone(), body);
            let token = store.begin((instance_id, None), PendingKind::Provision, polls);
            broker.accepted(token)
        }
    }
}

async fn get_instance(State(broker): State<Shared>, Path(instance_id): Path<String>) -> Response {
    let store = broker.store.read().await;
    let target = (instance_id.clone(), None);
    match store.instances.get(&instance_id) {
        Some(_) if store.in_flight(&target, PendingKind::Provision) => {
            error(StatusCode::NOT_FOUND, "ConcurrencyError", "instance is being provisioned")
        }
        Some(instance) => Json(json!({
            "service_id": instance.service_id,
            "plan_id": instance.plan_id,
            "dashboard_url": format!("http://mock-db/dashboard/{instance_id}"),
            "parameters": instance.parameters,
        }))
        .into_response(),
        None => error(StatusCode::NOT_FOUND, "NotFound", "no such instance"),
    }
}

async fn deprovision(
    State(broker): State<Shared>,
    Path(instance_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !has_correlation(&query) {
        return error(StatusCode::BAD_REQUEST, "BadRequest", "service_id and plan_id are required");
    }
    let mut store = broker.store.write().await;
    if !store.instances.contains_key(&instance_id) {
        return gone();
    }
    match broker.settings.mode {
        BrokerMode::Sync => {
            store.remove_instance(&instance_id);
            (StatusCode::OK, Json(json!({}))).into_response()
        }
        BrokerMode::Async { polls } => {
            if !accepts_incomplete(&query) {
                return async_required();
            }
            let token = store.begin((instance_id, None), PendingKind::Deprovision, polls);
            broker.accepted(token)
        }
    }
}

async fn instance_last_operation(
    State(broker): State<Shared>,
    Path(instance_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut store = broker.store.write().await;
    store.poll((instance_id, None), query.get("operation").map(String::as_str))
}

async fn bind(
    State(broker): State<Shared>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<BindBody>,
) -> Response {
    let mut store = broker.store.write().await;
    if !store.instances.contains_key(&instance_id) {
        return error(StatusCode::NOT_FOUND, "NotFound", "no such instance");
    }
    let key = (instance_id.clone(), binding_id.clone());
    if let Some(existing) = store.bindings.get(&key) {
        return if *existing == body {
            (
                StatusCode::OK,
                Json(json!({"credentials": credentials(&instance_id, &binding_id)})),
            )
                .into_response()
        } else {
            error(StatusCode::CONFLICT, "Conflict", "binding exists with different attributes")
        };
    }
    match broker.settings.mode {
        BrokerMode::Sync => {
            store.bindings.insert(key, body);
            (
                StatusCode::CREATED,
                Json(json!({"credentials": credentials(&instance_id, &binding_id)})),
            )
                .into_response()
        }
        BrokerMode::Async { polls } => {
            if !accepts_incomplete(&query) {
                return async_required();
            }
            store.bindings.insert(key, body);
            let token = store.begin((instance_id, Some(binding_id)), PendingKind::Bind, polls);
            broker.accepted(token)
        }
    }
}

async fn get_binding(
    State(broker): State<Shared>,
    Path((instance_id, binding_id)): Path<(String, String)>,
) -> Response {
    let store = broker.store.read().await;
    let target = (instance_id.clone(), Some(binding_id.clone()));
    if !store.exists(&target) || store.in_flight(&target, PendingKind::Bind) {
        return error(StatusCode::NOT_FOUND, "NotFound", "no such binding");
    }
    Json(json!({"credentials": credentials(&instance_id, &binding_id)})).into_response()
}

async fn unbind(
    State(broker): State<Shared>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !has_correlation(&query) {
        return error(StatusCode::BAD_REQUEST, "BadRequest", "service_id and plan_id are required");
    }
    let mut store = broker.store.write().await;
    let key = (instance_id.clone(), binding_id.clone());
    if !store.bindings.contains_key(&key) {
        return gone();
    }
    match broker.settings.mode {
        BrokerMode::Sync => {
            store.bindings.remove(&key);
            (StatusCode::OK, Json(json!({}))).into_response()
        }
        BrokerMode::Async { polls } => {
            if !accepts_incomplete(&query) {
                return async_required();
            }
            let token = store.begin((instance_id, Some(binding_id)), PendingKind::Unbind, polls);
            broker.accepted(token)
        }
    }
}

async fn binding_last_operation(
    State(broker): State<Shared>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut store = broker.store.write().await;
    store.poll(
        (instance_id, Some(binding_id)),
        query.get("operation").map(String::as_str),
    )
}
