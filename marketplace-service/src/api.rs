use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::application::{ApplicationForm, ApplicationOutcome};
use shared::catalog::{OfferingUpdate, StoreDraft, StoreListing};
use shared::evidence::{EvidenceKind, Upload, MAX_UPLOAD_BYTES};
use shared::*;
use std::collections::HashMap;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

use crate::handlers::{
    Inbox, Marketplace, Profile, SellerDocuments, SellerStoreView, Signup, StoreDetail,
    TransitionResult,
};
use crate::store::DashboardCounts;

/// Header the identity provider sets to the signed-in actor's id.
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Clone)]
pub struct AppState {
    pub market: Marketplace,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug)]
pub enum ApiError {
    Market(MarketError),
    Unauthenticated,
    BadRequest(String),
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        Self::Market(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "Sign in to continue.".to_string(),
                "unauthenticated",
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message, "bad_request"),
            ApiError::Market(err) => {
                let status = match &err {
                    MarketError::GuardViolation(_) if err.is_forbidden() => StatusCode::FORBIDDEN,
                    MarketError::GuardViolation(_) | MarketError::ResourceExhausted(_) => {
                        StatusCode::CONFLICT
                    }
                    MarketError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    MarketError::NotFound => StatusCode::NOT_FOUND,
                    MarketError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = match &err {
                    MarketError::Storage(_) => {
                        error!("Request failed: {}", err);
                        "Something went wrong. Please try again.".to_string()
                    }
                    _ => {
                        warn!("Request refused: {}", err);
                        err.to_string()
                    }
                };
                (status, message, err.code())
            }
        };
        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// The actor named by [`ACTOR_HEADER`], loaded fresh for this request.
pub struct CurrentActor(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or(ApiError::Unauthenticated)?;

        match state.market.actor(id).await {
            Ok(actor) => Ok(CurrentActor(actor)),
            Err(MarketError::NotFound) => Err(ApiError::Unauthenticated),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationQuery {
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ReservationQuery {
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SellerQuery {
    pub status: Option<SellerStatus>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/actors", post(signup))
        .route("/me", get(me))
        .route("/stores", get(browse_stores))
        .route("/stores/:id", get(store_detail))
        .route("/tanks/:id/reservations", post(reserve))
        .route("/reservations", get(my_orders))
        .route("/reservations/:id", get(receipt))
        .route("/reservations/:id/cancel", post(cancel_reservation))
        .route("/notifications", get(notifications))
        .route("/notifications/unread", get(unread_count))
        .route("/seller/applications", post(apply_as_seller))
        .route("/seller/application", get(my_application))
        .route("/seller/stores", get(seller_stores).post(create_store))
        .route("/seller/stores/:id", get(seller_store).delete(delete_store))
        .route("/seller/tanks/:id", put(update_offering))
        .route(
            "/seller/reservations/:id/pickup-proof",
            post(upload_pickup_proof),
        )
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/applications", get(applications))
        .route("/admin/applications/:id/approve", post(approve_application))
        .route("/admin/applications/:id/reject", post(reject_application))
        .route("/admin/sellers", get(sellers))
        .route("/admin/sellers/:id/suspension", post(toggle_seller_suspension))
        .route("/admin/stores", get(all_stores))
        .route("/admin/stores/:id/toggle", post(toggle_store))
        .route("/admin/reservations", get(reservations_for_review))
        .route("/admin/reservations/:id/approve", post(approve_pickup))
        .route("/admin/reservations/:id/reject", post(reject_pickup))
        .with_state(state)
        // a seller application carries up to four documents
        .layer(DefaultBodyLimit::max(4 * MAX_UPLOAD_BYTES + 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// Text fields and files of a multipart form.
#[derive(Default)]
struct FormParts {
    fields: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl FormParts {
    fn text(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    fn file(&mut self, kind: EvidenceKind) -> Option<Upload> {
        self.files.remove(kind.field())
    }
}

async fn read_form(mut multipart: Multipart) -> Result<FormParts, ApiError> {
    let mut form = FormParts::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                // browsers send an empty part for an untouched file input
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                form.files.insert(name, Upload::new(file_name, bytes.to_vec()));
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                form.fields.insert(name, text);
            }
        }
    }
    Ok(form)
}

pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<Signup>,
) -> Result<(StatusCode, Json<Actor>), ApiError> {
    let actor = state.market.signup(request).await?;
    Ok((StatusCode::CREATED, Json(actor)))
}

pub async fn me(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Profile> {
    Ok(Json(state.market.profile(&actor).await?))
}

pub async fn browse_stores(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Store>> {
    Ok(Json(state.market.browse_stores(&actor).await?))
}

pub async fn store_detail(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<StoreDetail> {
    Ok(Json(state.market.store_detail(&actor, id).await?))
}

pub async fn reserve(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(tank_id): Path<Uuid>,
    Json(request): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let reservation = state.market.reserve(&actor, tank_id, &request.name).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

pub async fn my_orders(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Reservation>> {
    Ok(Json(state.market.my_orders(&actor).await?))
}

pub async fn receipt(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Reservation> {
    Ok(Json(state.market.receipt(&actor, id).await?))
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<TransitionResult> {
    Ok(Json(state.market.cancel_reservation(&actor, id).await?))
}

pub async fn notifications(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Inbox> {
    Ok(Json(state.market.notifications(&actor).await?))
}

pub async fn unread_count(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<UnreadCount> {
    let unread = state.market.unread_count(&actor).await?;
    Ok(Json(UnreadCount { unread }))
}

pub async fn apply_as_seller(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SellerApplication>), ApiError> {
    let mut parts = read_form(multipart).await?;
    let form = ApplicationForm {
        business_name: parts.text("business_name"),
        business_address: parts.text("business_address"),
        tin_number: parts.fields.get("tin_number").cloned(),
        phone: parts.text("phone"),
        email: parts.text("email"),
    };
    let documents = SellerDocuments {
        business_permit: parts.file(EvidenceKind::BusinessPermit),
        dti_certificate: parts.file(EvidenceKind::DtiCertificate),
        mayors_permit: parts.file(EvidenceKind::MayorsPermit),
        valid_id: parts.file(EvidenceKind::ValidId),
    };

    let application = state
        .market
        .apply_as_seller(&actor, form, documents)
        .await?;
    Ok((StatusCode::CREATED, Json(application)))
}

pub async fn my_application(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<SellerApplication> {
    match state.market.my_application(&actor).await? {
        Some(application) => Ok(Json(application)),
        None => Err(MarketError::NotFound.into()),
    }
}

pub async fn seller_stores(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Store>> {
    Ok(Json(state.market.seller_stores(&actor).await?))
}

/// Multipart with a `draft` field holding the store draft as JSON and the
/// owner photo as a file.
pub async fn create_store(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    multipart: Multipart,
) -> Result<(StatusCode, Json<StoreListing>), ApiError> {
    let mut parts = read_form(multipart).await?;
    let draft = parts
        .fields
        .get("draft")
        .ok_or_else(|| MarketError::validation("Store details are required."))?;
    let draft: StoreDraft = serde_json::from_str(draft)
        .map_err(|e| MarketError::validation(format!("Invalid store details: {e}")))?;
    let photo = parts.file(EvidenceKind::OwnerPhoto);

    let listing = state.market.create_store(&actor, draft, photo).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

pub async fn seller_store(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<SellerStoreView> {
    Ok(Json(state.market.seller_store(&actor, id).await?))
}

pub async fn delete_store(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.market.delete_store(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_offering(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(update): Json<OfferingUpdate>,
) -> ApiResult<TankOffering> {
    Ok(Json(state.market.update_offering(&actor, id, update).await?))
}

pub async fn upload_pickup_proof(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<TransitionResult> {
    let mut parts = read_form(multipart).await?;
    let proof = parts.file(EvidenceKind::PickupProof);
    Ok(Json(
        state.market.upload_pickup_proof(&actor, id, proof).await?,
    ))
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<DashboardCounts> {
    Ok(Json(state.market.dashboard(&actor).await?))
}

pub async fn applications(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<ApplicationQuery>,
) -> ApiResult<Vec<SellerApplication>> {
    Ok(Json(state.market.applications(&actor, query.status).await?))
}

pub async fn approve_application(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<ApplicationOutcome> {
    Ok(Json(state.market.approve_application(&actor, id).await?))
}

pub async fn reject_application(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<ApplicationOutcome> {
    Ok(Json(
        state
            .market
            .reject_application(&actor, id, &request.reason)
            .await?,
    ))
}

pub async fn sellers(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<SellerQuery>,
) -> ApiResult<Vec<Actor>> {
    let status = query.status.unwrap_or(SellerStatus::Approved);
    Ok(Json(state.market.sellers(&actor, status).await?))
}

pub async fn toggle_seller_suspension(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Actor> {
    Ok(Json(
        state.market.toggle_seller_suspension(&actor, id).await?,
    ))
}

pub async fn all_stores(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Vec<Store>> {
    Ok(Json(state.market.all_stores(&actor).await?))
}

pub async fn toggle_store(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<Store> {
    Ok(Json(state.market.toggle_store(&actor, id).await?))
}

pub async fn reservations_for_review(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<ReservationQuery>,
) -> ApiResult<Vec<Reservation>> {
    Ok(Json(
        state
            .market
            .reservations_for_review(&actor, query.status)
            .await?,
    ))
}

pub async fn approve_pickup(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<TransitionResult> {
    Ok(Json(state.market.approve_pickup(&actor, id).await?))
}

pub async fn reject_pickup(
    State(state): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> ApiResult<TransitionResult> {
    Ok(Json(
        state
            .market
            .reject_pickup(&actor, id, &request.reason)
            .await?,
    ))
}
