use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use shelter_service::api::{create_router, AppState, USER_ID_HEADER, USER_ROLE_HEADER};
use shelter_service::store::MemoryStore;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    create_router(AppState::new(Arc::new(MemoryStore::new())))
}

struct Caller {
    id: Uuid,
    role: &'static str,
}

impl Caller {
    fn admin() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: "administrador",
        }
    }

    fn user() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: "usuario",
        }
    }
}

async fn call(app: &Router, caller: Option<&Caller>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header(USER_ID_HEADER, caller.id.to_string())
            .header(USER_ROLE_HEADER, caller.role);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_check_needs_no_identity() {
    let app = app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_identity_is_unauthenticated() {
    let app = app();
    let (status, body) = call(&app, None, "GET", "/api/donations", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("unauthenticated"));
}

#[tokio::test]
async fn donation_receipt_flows_into_inventory() {
    let app = app();
    let admin = Caller::admin();
    let donor = Caller::user();

    let (status, body) = call(
        &app,
        Some(&donor),
        "POST",
        "/api/donations",
        Some(json!({
            "articulo": "Dog Food",
            "categoria": "alimento_perros",
            "cantidad": 10,
            "unidad": "kg"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], json!("pendiente"));
    let donation_id = body["data"]["id"].as_str().unwrap().to_string();

    let uri = format!("/api/donations/{donation_id}/status");
    for _ in 0..2 {
        let (status, body) = call(&app, Some(&admin), "PATCH", &uri, Some(json!({"estado": "recibida"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], json!("recibida"));
    }

    let (status, body) = call(&app, Some(&donor), "GET", "/api/inventory", None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], json!(10));
    assert_eq!(items[0]["unit"], json!("kg"));
}

#[tokio::test]
async fn request_errors_use_stable_codes() {
    let app = app();
    let admin = Caller::admin();
    let user = Caller::user();

    let (status, body) = call(
        &app,
        Some(&admin),
        "POST",
        "/api/inventory",
        Some(json!({
            "name": "Cat Food",
            "category": "alimento_gatos",
            "quantity": 3,
            "unit": "kg"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let item_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        Some(&user),
        "POST",
        "/api/requests",
        Some(json!({"articulo_id": item_id, "cantidad": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], json!("insufficient_stock"));

    let (status, _) = call(
        &app,
        Some(&user),
        "POST",
        "/api/requests",
        Some(json!({"item_id": item_id, "quantity": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &app,
        Some(&user),
        "POST",
        "/api/requests",
        Some(json!({"item_id": item_id, "quantity": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("active_request_exists"));
}

#[tokio::test]
async fn users_cannot_adjust_stock() {
    let app = app();
    let admin = Caller::admin();
    let user = Caller::user();
    let (_, body) = call(
        &app,
        Some(&admin),
        "POST",
        "/api/inventory",
        Some(json!({
            "nombre": "Blanket",
            "categoria": "mantas",
            "cantidad": 40,
            "unidad": "unidades"
        })),
    )
    .await;
    let uri = format!("/api/inventory/{}/adjust", body["data"]["id"].as_str().unwrap());

    let (status, body) = call(&app, Some(&user), "PATCH", &uri, Some(json!({"amount": 1, "operation": "add"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("forbidden"));

    let (status, body) = call(&app, Some(&admin), "PATCH", &uri, Some(json!({"amount": 100, "operation": "subtract"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], json!("insufficient_stock"));

    let (status, body) = call(&app, Some(&admin), "PATCH", &uri, Some(json!({"amount": 1, "operation": "multiply"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_operation"));
}

#[tokio::test]
async fn invalid_bodies_are_validation_errors() {
    let app = app();
    let user = Caller::user();
    let (status, body) = call(
        &app,
        Some(&user),
        "POST",
        "/api/donations",
        Some(json!({
            "item_name": "X",
            "category": "juguetes",
            "quantity": 1,
            "unit": "unidades"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));

    let (status, body) = call(&app, Some(&user), "POST", "/api/donations", Some(json!({"category": "unknown"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));
}

#[tokio::test]
async fn blank_names_are_rejected_after_trimming() {
    let app = app();
    let admin = Caller::admin();
    let donor = Caller::user();

    let (status, body) = call(
        &app,
        Some(&donor),
        "POST",
        "/api/donations",
        Some(json!({
            "articulo": "    ",
            "categoria": "alimento_perros",
            "cantidad": 3,
            "unidad": "kg"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));

    let (status, body) = call(
        &app,
        Some(&admin),
        "POST",
        "/api/inventory",
        Some(json!({
            "name": " x ",
            "category": "juguetes",
            "quantity": 1,
            "unit": "unidades"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("validation_error"));

    let (_, body) = call(&app, Some(&admin), "GET", "/api/donations", None).await;
    assert_eq!(body["data"], json!([]));
    let (_, body) = call(&app, Some(&admin), "GET", "/api/inventory", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn requests_carry_an_item_summary() {
    let app = app();
    let admin = Caller::admin();
    let user = Caller::user();

    let (_, body) = call(
        &app,
        Some(&admin),
        "POST",
        "/api/inventory",
        Some(json!({
            "name": "Cat Food",
            "category": "alimento_gatos",
            "quantity": 8,
            "unit": "kg"
        })),
    )
    .await;
    let item_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        Some(&user),
        "POST",
        "/api/requests",
        Some(json!({"item_id": item_id, "quantity": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["item"]["name"], json!("Cat Food"));
    let request_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, Some(&user), "GET", "/api/requests", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = &body["data"][0];
    assert_eq!(listed["id"], json!(request_id));
    assert_eq!(listed["status"], json!("pendiente"));
    assert_eq!(listed["item"]["id"], json!(item_id));
    assert_eq!(listed["item"]["category"], json!("alimento_gatos"));
    assert_eq!(listed["item"]["unit"], json!("kg"));
    assert_eq!(listed["item"]["quantity"], json!(8));

    let uri = format!("/api/requests/{request_id}");
    let (status, body) = call(&app, Some(&user), "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["item"]["name"], json!("Cat Food"));
    assert_eq!(body["data"]["quantity"], json!(2));
}

#[tokio::test]
async fn bad_inventory_filters_use_the_envelope() {
    let app = app();
    let user = Caller::user();
    let (status, body) = call(&app, Some(&user), "GET", "/api/inventory?category=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("validation_error"));

    let (status, body) = call(&app, Some(&user), "GET", "/api/inventory?available=true&category=mantas", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}
