//! REST registrar tests
//!
//! Exercise `RestWalletApi` end to end against an in-process fake of the
//! wallet objects service and its token endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use walletpass_core::testing::rsa_key_pair_pem;
use walletpass_core::{PassDefinition, SerialNumber};
use walletpass_registrar::{
    RegistrarError, RestWalletApi, SaveLinkSigner, ServiceAccountKey, WalletRegistrar,
};

// =============================================================================
// Fake wallet service
// =============================================================================

const ACCESS_TOKEN: &str = "fake-access-token";

#[derive(Default)]
struct FakeService {
    classes: Mutex<HashMap<String, Value>>,
    objects: Mutex<HashMap<String, Value>>,
    token_requests: AtomicUsize,
}

type Shared = Arc<FakeService>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", ACCESS_TOKEN))
        .unwrap_or(false)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": { "code": status.as_u16(), "message": message } }))).into_response()
}

async fn token(State(state): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let grant = form.get("grant_type").map(String::as_str);
    if grant != Some("urn:ietf:params:oauth:grant-type:jwt-bearer") || !form.contains_key("assertion") {
        return error(StatusCode::BAD_REQUEST, "invalid_grant");
    }
    Json(json!({ "access_token": ACCESS_TOKEN, "expires_in": 3600, "token_type": "Bearer" }))
        .into_response()
}

async fn token_denied() -> Response {
    error(StatusCode::UNAUTHORIZED, "invalid_client")
}

async fn insert_class(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "missing credentials");
    }
    let id = body["id"].as_str().unwrap_or_default().to_string();
    if id.contains("outage") {
        return error(StatusCode::SERVICE_UNAVAILABLE, "backend unavailable");
    }
    let mut classes = state.classes.lock().await;
    if classes.contains_key(&id) {
        return error(StatusCode::CONFLICT, "class already exists");
    }
    classes.insert(id, body.clone());
    Json(body).into_response()
}

async fn insert_object(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "missing credentials");
    }
    let id = body["id"].as_str().unwrap_or_default().to_string();
    let mut objects = state.objects.lock().await;
    if objects.contains_key(&id) {
        return error(StatusCode::CONFLICT, "object already exists");
    }
    objects.insert(id, body.clone());
    Json(body).into_response()
}

async fn get_object(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "missing credentials");
    }
    match state.objects.lock().await.get(&id) {
        Some(object) => Json(object.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "no such object"),
    }
}

async fn patch_object(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "missing credentials");
    }
    let mut objects = state.objects.lock().await;
    let Some(object) = objects.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, "no such object");
    };
    if let (Some(target), Some(fields)) = (object.as_object_mut(), patch.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    Json(object.clone()).into_response()
}

async fn spawn_fake() -> (SocketAddr, Shared) {
    let state: Shared = Arc::new(FakeService::default());
    let app = Router::new()
        .route("/token", post(token))
        .route("/token-denied", post(token_denied))
        .route("/walletobjects/v1/genericClass", post(insert_class))
        .route("/walletobjects/v1/genericObject", post(insert_object))
        .route(
            "/walletobjects/v1/genericObject/{id}",
            get(get_object).patch(patch_object),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

// =============================================================================
// Test Helpers
// =============================================================================

fn service_account(addr: SocketAddr, token_path: &str) -> (ServiceAccountKey, Vec<u8>) {
    let (private_pem, public_pem) = rsa_key_pair_pem();
    let key = ServiceAccountKey::new(
        "issuer@acme-project.iam.gserviceaccount.com",
        String::from_utf8(private_pem).unwrap(),
    )
    .with_token_uri(format!("http://{}{}", addr, token_path));
    (key, public_pem)
}

fn rest_registrar(addr: SocketAddr, key: ServiceAccountKey) -> WalletRegistrar {
    let api = RestWalletApi::new(key)
        .unwrap()
        .with_base_url(format!("http://{}/walletobjects/v1", addr));
    WalletRegistrar::new(Arc::new(api), "3388000000022")
}

fn acme() -> PassDefinition {
    PassDefinition::new("Acme", "VIP", "ACME", "#000000", "#FFFFFF")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_ensure_class_conflict_is_success() {
    let (addr, state) = spawn_fake().await;
    let (key, _) = service_account(addr, "/token");
    let registrar = rest_registrar(addr, key);

    let first = registrar.ensure_class(&acme(), "tags").await.unwrap();
    let second = registrar.ensure_class(&acme(), "tags").await.unwrap();

    assert_eq!(first, "3388000000022.tags");
    assert_eq!(first, second);
    assert_eq!(state.classes.lock().await.len(), 1);
    assert_eq!(state.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_create_object_conflict_is_duplicate() {
    let (addr, state) = spawn_fake().await;
    let (key, _) = service_account(addr, "/token");
    let registrar = rest_registrar(addr, key);
    let serial = SerialNumber::new("WT-1").unwrap();

    let class_id = registrar.ensure_class(&acme(), "tags").await.unwrap();
    let object_id = registrar.create_object(&acme(), &serial, &class_id).await.unwrap();
    assert_eq!(object_id, "3388000000022.WT-1");

    let err = registrar.create_object(&acme(), &serial, &class_id).await.unwrap_err();
    assert_eq!(err, RegistrarError::DuplicateObject("3388000000022.WT-1".into()));
    assert_eq!(state.objects.lock().await.len(), 1);
}

#[tokio::test]
async fn test_get_and_update_object() {
    let (addr, _) = spawn_fake().await;
    let (key, _) = service_account(addr, "/token");
    let registrar = rest_registrar(addr, key);
    let serial = SerialNumber::new("WT-5").unwrap();

    let object_id = registrar.create_object(&acme(), &serial, "3388000000022.tags").await.unwrap();
    let fetched = registrar.get_object(&object_id).await.unwrap();
    assert_eq!(fetched["state"], "ACTIVE");

    let updated = registrar
        .update_object(&object_id, &json!({ "state": "EXPIRED" }))
        .await
        .unwrap();
    assert_eq!(updated["state"], "EXPIRED");

    let missing = registrar.get_object("3388000000022.nope").await.unwrap_err();
    assert!(matches!(missing, RegistrarError::NotFound(_)));
}

#[tokio::test]
async fn test_remote_error_carries_status_and_message() {
    let (addr, _) = spawn_fake().await;
    let (key, _) = service_account(addr, "/token");
    let registrar = rest_registrar(addr, key);

    let err = registrar.ensure_class(&acme(), "outage").await.unwrap_err();
    assert_eq!(
        err,
        RegistrarError::Remote { status: 503, message: "backend unavailable".into() }
    );
}

#[tokio::test]
async fn test_rejected_token_exchange_is_auth_error() {
    let (addr, state) = spawn_fake().await;
    let (key, _) = service_account(addr, "/token-denied");
    let registrar = rest_registrar(addr, key);

    let err = registrar.ensure_class(&acme(), "tags").await.unwrap_err();
    assert!(matches!(err, RegistrarError::Auth(_)));
    assert!(state.classes.lock().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_calls_share_one_token_exchange() {
    let (addr, state) = spawn_fake().await;
    let (key, _) = service_account(addr, "/token");
    let registrar = Arc::new(rest_registrar(addr, key));

    let mut handles = Vec::new();
    for i in 0..8 {
        let registrar = registrar.clone();
        handles.push(tokio::spawn(async move {
            registrar.ensure_class(&acme(), &format!("class_{}", i)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(state.token_requests.load(Ordering::SeqCst), 1);
    assert_eq!(state.classes.lock().await.len(), 8);
}

#[tokio::test]
async fn test_save_link_for_registered_object() {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use walletpass_registrar::SaveClaims;

    let (addr, _) = spawn_fake().await;
    let (key, public_pem) = service_account(addr, "/token");
    let registrar = rest_registrar(addr, key.clone());
    let signer = SaveLinkSigner::from_service_account(&key).unwrap();
    let serial = SerialNumber::new("WT-1").unwrap();

    let class_id = registrar.ensure_class(&acme(), "tags").await.unwrap();
    let object_id = registrar.create_object(&acme(), &serial, &class_id).await.unwrap();
    let link = signer.sign(&[object_id.clone()]).unwrap();

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&["google"]);
    let claims = decode::<SaveClaims>(&link.token, &DecodingKey::from_rsa_pem(&public_pem).unwrap(), &validation)
        .unwrap()
        .claims;
    assert_eq!(claims.iss, key.client_email);
    assert_eq!(claims.payload.generic_objects[0].id, object_id);
}
