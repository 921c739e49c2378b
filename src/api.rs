use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;
use ulid::Ulid;

use crate::auth::AuthenticatedPrincipal;
use crate::engine::{now_ms, Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability::{record_request, Operation};

pub type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    clock: Clock,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_clock(engine, Arc::new(now_ms))
    }

    /// Fixed or simulated time source, for tests.
    pub fn with_clock(engine: Arc<Engine>, clock: Clock) -> Self {
        Self { engine, clock }
    }

    fn now(&self) -> Ms {
        (self.clock)()
    }
}

// ── Envelope & errors ────────────────────────────────────────────

/// `{success, message?, data?}` wrapper carried by every response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn reply<T: Serialize>(status: StatusCode, message: Option<&str>, data: Option<T>) -> Response {
    let body = Envelope {
        success: status.is_success(),
        message: message.map(str::to_string),
        data,
    };
    (status, Json(body)).into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    reply(StatusCode::OK, None, Some(data))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Access denied. Insufficient permissions.")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<SlotError> for ApiError {
    fn from(e: SlotError) -> Self {
        ApiError::Engine(e.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e.kind() {
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict | ErrorKind::InvalidState => StatusCode::CONFLICT,
                ErrorKind::TooLate => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
            "Something went wrong!".to_string()
        } else {
            self.to_string()
        };
        reply::<()>(status, Some(&message), None)
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn parse_slots(raw: Vec<RawSlot>) -> Result<Vec<TimeSlot>, ApiError> {
    raw.into_iter()
        .map(|r| TimeSlot::try_from(r).map_err(ApiError::from))
        .collect()
}

fn required_date(raw: &str) -> Result<chrono::NaiveDate, ApiError> {
    parse_date(raw).ok_or_else(|| ApiError::BadRequest("Invalid date format".into()))
}

// ── Router ───────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let schedule = Router::new()
        .route("/my-availability", get(my_availability))
        .route("/availability", post(create_availability))
        .route(
            "/availability/:id",
            patch(update_availability).delete(delete_availability),
        )
        .route("/trainers", get(browse))
        .route("/book", post(book))
        .route("/my-bookings", get(my_bookings))
        .route("/bookings/:id/cancel", patch(cancel_booking))
        .route("/trainer-bookings", get(trainer_bookings));

    let users = Router::new()
        .route("/trainers", get(list_trainers))
        .route("/:id", put(upsert_user));

    Router::new()
        .route("/health", get(health))
        .nest("/api/schedule", schedule)
        .nest("/api/users", users)
        .route_layer(middleware::from_fn(track_requests))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Per-operation request counters and latency.
async fn track_requests(request: Request, next: Next) -> Response {
    let op = request
        .extensions()
        .get::<MatchedPath>()
        .and_then(|path| Operation::from_route(request.method(), path.as_str()));
    let started = Instant::now();
    let response = next.run(request).await;
    if let Some(op) = op {
        record_request(op, response.status().as_u16(), started.elapsed());
    }
    response
}

async fn not_found(uri: Uri) -> Response {
    reply::<()>(StatusCode::NOT_FOUND, Some(&format!("Route {uri} not found")), None)
}

async fn health() -> Response {
    reply::<()>(StatusCode::OK, Some("gymbook is running"), None)
}

// ── Directory ────────────────────────────────────────────────────

async fn list_trainers(State(state): State<AppState>, _who: AuthenticatedPrincipal) -> Response {
    ok(json!({ "trainers": state.engine.list_trainers() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertUserRequest {
    name: String,
    email: String,
    role: Role,
    #[serde(default)]
    profile_pic: Option<String>,
}

async fn upsert_user(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
    Path(id): Path<String>,
    payload: Result<Json<UpsertUserRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    who.require(&[Role::Admin])?;
    let id: Ulid = id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid user id".into()))?;
    let req = body(payload)?;
    let profile = UserProfile {
        id,
        name: req.name,
        email: req.email,
        role: req.role,
        profile_pic: req.profile_pic,
    };
    state.engine.upsert_user(profile).await?;
    Ok(reply(
        StatusCode::OK,
        Some("User updated successfully"),
        Some(json!({ "user": state.engine.get_user(&id) })),
    ))
}

// ── Availability (trainer) ───────────────────────────────────────

async fn my_availability(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
) -> Result<Response, ApiError> {
    who.require(&[Role::Trainer])?;
    let availability = state.engine.list_trainer_availability(who.user_id).await;
    Ok(ok(json!({ "availability": availability })))
}

#[derive(Debug, Deserialize)]
struct CreateAvailabilityRequest {
    date: Option<String>,
    slots: Option<Vec<RawSlot>>,
}

async fn create_availability(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
    payload: Result<Json<CreateAvailabilityRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    who.require(&[Role::Trainer])?;
    let req = body(payload)?;
    let (Some(date), Some(slots)) = (req.date, req.slots.filter(|s| !s.is_empty())) else {
        return Err(ApiError::BadRequest(
            "Date and at least one time slot are required".into(),
        ));
    };
    let date = required_date(&date)?;
    let slots = parse_slots(slots)?;
    let availability = state
        .engine
        .create_availability(who.user_id, date, slots, state.now())
        .await?;
    Ok(reply(
        StatusCode::CREATED,
        Some("Availability created successfully"),
        Some(json!({ "availability": availability })),
    ))
}

#[derive(Debug, Deserialize)]
struct UpdateAvailabilityRequest {
    slots: Option<Vec<RawSlot>>,
}

async fn update_availability(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
    Path(id): Path<String>,
    payload: Result<Json<UpdateAvailabilityRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    who.require(&[Role::Trainer])?;
    let req = body(payload)?;
    let Some(slots) = req.slots.filter(|s| !s.is_empty()) else {
        return Err(ApiError::BadRequest("At least one time slot is required".into()));
    };
    let slots = parse_slots(slots)?;
    let id = availability_id(&id)?;
    let availability = state
        .engine
        .update_availability(id, who.user_id, slots, state.now())
        .await?;
    Ok(reply(
        StatusCode::OK,
        Some("Availability updated successfully"),
        Some(json!({ "availability": availability })),
    ))
}

async fn delete_availability(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    who.require(&[Role::Trainer])?;
    let id = availability_id(&id)?;
    state.engine.delete_availability(id, who.user_id).await?;
    Ok(reply::<()>(
        StatusCode::OK,
        Some("Availability deleted successfully"),
        None,
    ))
}

/// Ids that do not parse cannot match any record.
fn availability_id(raw: &str) -> Result<Ulid, ApiError> {
    raw.parse()
        .map_err(|_| EngineError::AvailabilityNotFound(Ulid::nil()).into())
}

// ── Browsing ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    date: Option<String>,
}

async fn browse(
    State(state): State<AppState>,
    _who: AuthenticatedPrincipal,
    Query(query): Query<BrowseQuery>,
) -> Response {
    let view = match query.date.filter(|d| !d.trim().is_empty()) {
        None => state.engine.browse(None, state.now()).await,
        Some(raw) => match parse_date(&raw) {
            Some(date) => state.engine.browse(Some(date), state.now()).await,
            None => BrowseView {
                trainers: state.engine.list_trainers(),
                availability: Vec::new(),
            },
        },
    };
    ok(view)
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookRequest {
    trainer_id: Option<String>,
    date: Option<String>,
    slot: Option<RawSlot>,
}

async fn book(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
    payload: Result<Json<BookRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    who.require(&[Role::Member])?;
    let req = body(payload)?;
    let (Some(trainer_id), Some(date), Some(slot)) = (req.trainer_id, req.date, req.slot) else {
        return Err(ApiError::BadRequest(
            "Trainer ID, date, and time slot are required".into(),
        ));
    };
    let date = required_date(&date)?;
    let slot = TimeSlot::try_from(slot)?;
    let trainer_id = trainer_id
        .parse::<Ulid>()
        .map_err(|_| EngineError::TrainerNotFound(Ulid::nil()))?;
    let booking = state
        .engine
        .book(who.user_id, trainer_id, date, slot, state.now())
        .await?;
    Ok(reply(
        StatusCode::CREATED,
        Some("Session booked successfully"),
        Some(json!({ "booking": booking })),
    ))
}

async fn my_bookings(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
) -> Result<Response, ApiError> {
    who.require(&[Role::Member])?;
    let bookings = state.engine.list_member_bookings(who.user_id).await;
    Ok(ok(json!({ "bookings": bookings })))
}

async fn cancel_booking(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    who.require(&[Role::Member])?;
    let id = id
        .parse::<Ulid>()
        .map_err(|_| EngineError::BookingNotFound(Ulid::nil()))?;
    let booking = state
        .engine
        .cancel_booking(id, who.user_id, state.now())
        .await?;
    Ok(reply(
        StatusCode::OK,
        Some("Booking cancelled successfully"),
        Some(json!({ "booking": booking })),
    ))
}

async fn trainer_bookings(
    State(state): State<AppState>,
    who: AuthenticatedPrincipal,
) -> Result<Response, ApiError> {
    who.require(&[Role::Trainer])?;
    let bookings = state.engine.list_trainer_bookings(who.user_id).await;
    Ok(ok(json!({ "bookings": bookings })))
}
