use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{Category, DonationStatus, Principal, RequestStatus, Role, Unit};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::donations::{DonationService, NewDonation};
use crate::error::ShelterError;
use crate::inventory::{InventoryService, ItemPatch, NewItem};
use crate::models::{normalize_name, ItemFilter};
use crate::requests::{NewRequest, RequestEdit, RequestService, StatusChange};
use crate::store::Store;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

pub struct AppState<S> {
    pub inventory: InventoryService<S>,
    pub donations: DonationService<S>,
    pub requests: RequestService<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
            donations: self.donations.clone(),
            requests: self.requests.clone(),
        }
    }
}

impl<S: Store> AppState<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            inventory: InventoryService::new(store.clone()),
            donations: DonationService::new(store.clone()),
            requests: RequestService::new(store),
        }
    }
}

/// Response body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

fn success<T: Serialize>(status: StatusCode, message: Option<&str>, data: Option<T>) -> Response {
    let body = Envelope {
        success: true,
        message: message.map(str::to_string),
        data,
        error: None,
    };
    (status, Json(body)).into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    success(StatusCode::OK, None, Some(data))
}

fn created<T: Serialize>(message: &str, data: T) -> Response {
    success(StatusCode::CREATED, Some(message), Some(data))
}

fn done(message: &str) -> Response {
    success::<()>(StatusCode::OK, Some(message), None)
}

#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(String),
    Shelter(ShelterError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<ShelterError> for ApiError {
    fn from(err: ShelterError) -> Self {
        Self::Shelter(err)
    }
}

fn status_of(err: &ShelterError) -> StatusCode {
    match err {
        ShelterError::NotFound(_) => StatusCode::NOT_FOUND,
        ShelterError::Forbidden(_) => StatusCode::FORBIDDEN,
        ShelterError::InvalidState(_)
        | ShelterError::ActiveRequestExists
        | ShelterError::DuplicateItem { .. } => StatusCode::CONFLICT,
        ShelterError::Unavailable(_) | ShelterError::InsufficientStock { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ShelterError::InvalidOperation(_) | ShelterError::Validation(_) => StatusCode::BAD_REQUEST,
        ShelterError::StorageFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Unauthenticated(message) => (StatusCode::UNAUTHORIZED, "unauthenticated", message),
            ApiError::Shelter(err) => {
                let status = status_of(&err);
                let message = match &err {
                    ShelterError::StorageFault(detail) => {
                        tracing::error!("Request failed: {}", detail);
                        "internal server error".to_string()
                    }
                    other => other.to_string(),
                };
                (status, err.code(), message)
            }
        };
        let body = Envelope::<()> {
            success: false,
            message: Some(message),
            data: None,
            error: Some(code),
        };
        (status, Json(body)).into_response()
    }
}

/// Caller identity forwarded by the gateway in `x-user-id` / `x-user-role`.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub Principal);

fn header<'a>(parts: &'a Parts, name: &str) -> ApiResult<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated(format!("missing {name} header")))
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)?
            .trim()
            .parse::<Uuid>()
            .map_err(|_| ApiError::Unauthenticated(format!("{USER_ID_HEADER} is not a valid id")))?;
        let role = header(parts, USER_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(|e| ApiError::Unauthenticated(e.to_string()))?;
        Ok(Identity(Principal::new(user_id, role)))
    }
}

/// JSON body that has passed its `validator` rules.
pub struct Valid<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ShelterError::Validation(e.body_text()))?;
        body.validate()
            .map_err(|e| ShelterError::Validation(e.to_string()))?;
        Ok(Valid(body))
    }
}

/// Query string deserialized with the same error envelope as bodies.
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ShelterError::Validation(e.body_text()))?;
        Ok(QueryParams(params))
    }
}

/// Names are stored trimmed, so their length is checked the same way.
fn trimmed_name(name: &str) -> Result<(), ValidationError> {
    normalize_name(name)
        .map(|_| ())
        .map_err(|_| ValidationError::new("name_length"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDonationBody {
    #[serde(alias = "articulo")]
    #[validate(custom = "trimmed_name")]
    pub item_name: String,
    #[serde(alias = "categoria")]
    pub category: Category,
    #[serde(alias = "cantidad")]
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[serde(alias = "unidad")]
    pub unit: Unit,
    #[serde(alias = "descripcion")]
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DonationStatusBody {
    #[serde(alias = "estado")]
    pub status: DonationStatus,
    #[serde(alias = "notas")]
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestBody {
    #[serde(alias = "articulo_id", alias = "articuloId")]
    pub item_id: Uuid,
    #[serde(alias = "cantidad")]
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[serde(alias = "descripcion")]
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRequestBody {
    #[serde(alias = "cantidad")]
    #[validate(range(min = 1))]
    pub quantity: Option<i32>,
    #[serde(alias = "descripcion")]
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RequestStatusBody {
    #[serde(alias = "estado")]
    pub status: RequestStatus,
    #[serde(alias = "motivo_rechazo", alias = "motivoRechazo")]
    #[validate(length(max = 500))]
    pub rejection_reason: Option<String>,
    #[serde(alias = "notas")]
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateItemBody {
    #[serde(alias = "nombre")]
    #[validate(custom = "trimmed_name")]
    pub name: String,
    #[serde(alias = "categoria")]
    pub category: Category,
    #[serde(alias = "cantidad")]
    #[validate(range(min = 0))]
    pub quantity: i32,
    #[serde(alias = "unidad")]
    pub unit: Unit,
    #[serde(alias = "descripcion")]
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateItemBody {
    #[serde(alias = "nombre")]
    #[validate(custom = "trimmed_name")]
    pub name: Option<String>,
    #[serde(alias = "categoria")]
    pub category: Option<Category>,
    #[serde(alias = "cantidad")]
    #[validate(range(min = 0))]
    pub quantity: Option<i32>,
    #[serde(alias = "unidad")]
    pub unit: Option<Unit>,
    #[serde(alias = "descripcion")]
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[serde(alias = "disponible")]
    pub available: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustBody {
    #[serde(alias = "cantidad")]
    #[validate(range(min = 1))]
    pub amount: i32,
    #[serde(alias = "operacion")]
    pub operation: String,
}

pub fn create_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/donations",
            post(create_donation::<S>).get(list_donations::<S>),
        )
        .route("/api/donations/admin/stats", get(donation_stats::<S>))
        .route(
            "/api/donations/:id",
            get(get_donation::<S>).delete(delete_donation::<S>),
        )
        .route("/api/donations/:id/status", patch(update_donation_status::<S>))
        .route(
            "/api/requests",
            post(create_request::<S>).get(list_requests::<S>),
        )
        .route(
            "/api/requests/:id",
            get(get_request::<S>)
                .put(update_request::<S>)
                .delete(delete_request::<S>),
        )
        .route("/api/requests/:id/status", patch(update_request_status::<S>))
        .route(
            "/api/inventory",
            get(list_items::<S>).post(create_item::<S>),
        )
        .route("/api/inventory/admin/stats", get(inventory_stats::<S>))
        .route(
            "/api/inventory/:id",
            get(get_item::<S>)
                .put(update_item::<S>)
                .delete(delete_item::<S>),
        )
        .route("/api/inventory/:id/adjust", patch(adjust_item::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

async fn create_donation<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Valid(body): Valid<CreateDonationBody>,
) -> ApiResult<Response> {
    let donation = state
        .donations
        .create(
            &principal,
            NewDonation {
                item_name: body.item_name,
                category: body.category,
                quantity: body.quantity,
                unit: body.unit,
                description: body.description,
            },
        )
        .await?;
    Ok(created("Donation registered", donation))
}

async fn list_donations<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
) -> ApiResult<Response> {
    Ok(ok(state.donations.list(&principal).await?))
}

async fn get_donation<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    Ok(ok(state.donations.get(&principal, id).await?))
}

async fn update_donation_status<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
    Valid(body): Valid<DonationStatusBody>,
) -> ApiResult<Response> {
    let donation = state
        .donations
        .update_status(&principal, id, body.status, body.notes)
        .await?;
    Ok(success(StatusCode::OK, Some("Donation status updated"), Some(donation)))
}

async fn delete_donation<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    state.donations.delete(&principal, id).await?;
    Ok(done("Donation deleted"))
}

async fn donation_stats<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
) -> ApiResult<Response> {
    Ok(ok(state.donations.stats(&principal).await?))
}

async fn create_request<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Valid(body): Valid<CreateRequestBody>,
) -> ApiResult<Response> {
    let request = state
        .requests
        .create(
            &principal,
            NewRequest {
                item_id: body.item_id,
                quantity: body.quantity,
                description: body.description,
            },
        )
        .await?;
    Ok(created("Request submitted", request))
}

async fn list_requests<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
) -> ApiResult<Response> {
    Ok(ok(state.requests.list(&principal).await?))
}

async fn get_request<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    Ok(ok(state.requests.get(&principal, id).await?))
}

async fn update_request<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
    Valid(body): Valid<UpdateRequestBody>,
) -> ApiResult<Response> {
    let edit = RequestEdit {
        quantity: body.quantity,
        description: body.description,
    };
    let request = state.requests.update(&principal, id, edit).await?;
    Ok(success(StatusCode::OK, Some("Request updated"), Some(request)))
}

async fn update_request_status<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
    Valid(body): Valid<RequestStatusBody>,
) -> ApiResult<Response> {
    let change = StatusChange {
        status: Some(body.status),
        rejection_reason: body.rejection_reason,
        notes: body.notes,
    };
    let request = state.requests.update_status(&principal, id, change).await?;
    Ok(success(StatusCode::OK, Some("Request status updated"), Some(request)))
}

async fn delete_request<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    state.requests.delete(&principal, id).await?;
    Ok(done("Request deleted"))
}

async fn list_items<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    QueryParams(filter): QueryParams<ItemFilter>,
) -> ApiResult<Response> {
    Ok(ok(state.inventory.list(&principal, filter).await?))
}

async fn get_item<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    Ok(ok(state.inventory.get(&principal, id).await?))
}

async fn create_item<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Valid(body): Valid<CreateItemBody>,
) -> ApiResult<Response> {
    let item = state
        .inventory
        .create(
            &principal,
            NewItem {
                name: body.name,
                category: body.category,
                quantity: body.quantity,
                unit: body.unit,
                description: body.description,
            },
        )
        .await?;
    Ok(created("Item added to inventory", item))
}

async fn update_item<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
    Valid(body): Valid<UpdateItemBody>,
) -> ApiResult<Response> {
    let patch = ItemPatch {
        name: body.name,
        category: body.category,
        quantity: body.quantity,
        unit: body.unit,
        description: body.description,
        available: body.available,
    };
    let item = state.inventory.update(&principal, id, patch).await?;
    Ok(success(StatusCode::OK, Some("Item updated"), Some(item)))
}

async fn delete_item<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    state.inventory.delete(&principal, id).await?;
    Ok(done("Item deleted"))
}

async fn adjust_item<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
    Path(id): Path<Uuid>,
    Valid(body): Valid<AdjustBody>,
) -> ApiResult<Response> {
    let item = state
        .inventory
        .adjust(&principal, id, body.amount, &body.operation)
        .await?;
    Ok(success(StatusCode::OK, Some("Stock adjusted"), Some(item)))
}

async fn inventory_stats<S: Store>(
    State(state): State<AppState<S>>,
    Identity(principal): Identity,
) -> ApiResult<Response> {
    Ok(ok(state.inventory.stats(&principal).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rules_map_to_client_errors() {
        assert_eq!(status_of(&ShelterError::ActiveRequestExists), StatusCode::CONFLICT);
        assert_eq!(
            status_of(&ShelterError::InsufficientStock {
                requested: 2,
                available: 1,
                unit: Unit::Units
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_of(&ShelterError::NotFound("donation")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(&ShelterError::storage("pool closed")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn spanish_field_names_are_accepted() {
        let body: RequestStatusBody = serde_json::from_str(
            r#"{"estado": "rechazada", "motivoRechazo": "sin stock", "notas": "ok"}"#,
        )
        .unwrap();
        assert_eq!(body.status, RequestStatus::Rejected);
        assert_eq!(body.rejection_reason.as_deref(), Some("sin stock"));

        let donation: CreateDonationBody = serde_json::from_str(
            r#"{"articulo": "x", "categoria": "mantas", "cantidad": 0, "unidad": "unidades"}"#,
        )
        .unwrap();
        assert!(donation.validate().is_err());
    }
}
