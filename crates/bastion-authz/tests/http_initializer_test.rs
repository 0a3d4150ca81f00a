//! Tests for the HTTP tenant initializer against a local axum server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use bastion_authz::config::{ServiceEndpoint, TenantInitConfig};
use bastion_authz::error::AuthzError;
use bastion_authz::{HttpTenantInitializer, TenantInitRequest, TenantInitializer};
use bastion_core::models::tenant::TenantMetadata;
use chrono::Utc;
use serde_json::Value;
use tokio::net::TcpListener;
use uuid::Uuid;

type Received = Arc<Mutex<Vec<Value>>>;

async fn record(State(received): State<Received>, Json(body): Json<Value>) -> StatusCode {
    received.lock().unwrap().push(body);
    StatusCode::CREATED
}

async fn unavailable() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn slow() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::OK
}

/// Serve `app` on an ephemeral port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn request() -> TenantInitRequest {
    TenantInitRequest {
        tenant_id: Uuid::new_v4(),
        tenant_name: "Acme".into(),
        tenant_slug: "acme-corp".into(),
        metadata: TenantMetadata::default(),
        created_at: Utc::now(),
    }
}

fn initializer(timeout_secs: u64) -> HttpTenantInitializer {
    HttpTenantInitializer::new(&TenantInitConfig {
        request_timeout_secs: timeout_secs,
        ..TenantInitConfig::default()
    })
    .unwrap()
}

fn endpoint(name: &str, base_url: String) -> ServiceEndpoint {
    ServiceEndpoint {
        name: name.into(),
        base_url,
    }
}

#[tokio::test]
async fn posts_tenant_payload_to_initialize_path() {
    let received = Received::default();
    let app = Router::new()
        .route("/tenants/initialize", post(record))
        .with_state(received.clone());
    let base_url = serve(app).await;

    let req = request();
    initializer(5)
        .initialize(&endpoint("crm", format!("{base_url}/")), &req)
        .await
        .unwrap();

    let bodies = received.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["tenant_id"], req.tenant_id.to_string());
    assert_eq!(bodies[0]["tenant_slug"], "acme-corp");
    assert_eq!(bodies[0]["tenant_name"], "Acme");
}

#[tokio::test]
async fn non_success_status_is_a_failure() {
    let app = Router::new().route("/tenants/initialize", post(unavailable));
    let base_url = serve(app).await;

    let err = initializer(5)
        .initialize(&endpoint("billing", base_url), &request())
        .await
        .unwrap_err();
    match err {
        AuthzError::InitializationFailed { service, reason } => {
            assert_eq!(service, "billing");
            assert!(reason.contains("503"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_route_is_a_failure() {
    let base_url = serve(Router::new()).await;
    assert!(
        initializer(5)
            .initialize(&endpoint("crm", base_url), &request())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn slow_service_times_out() {
    let app = Router::new().route("/tenants/initialize", post(slow));
    let base_url = serve(app).await;

    let err = initializer(1)
        .initialize(&endpoint("crm", base_url), &request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthzError::InitializationFailed { ref reason, .. } if reason == "request timed out"
    ));
}

#[tokio::test]
async fn unreachable_service_is_a_failure() {
    // Bind and drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = initializer(2)
        .initialize(&endpoint("crm", format!("http://{addr}")), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::InitializationFailed { .. }));
}
