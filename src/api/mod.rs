mod dto;
mod error;

pub use dto::*;
pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{MatchedPath, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use ulid::Ulid;

use crate::auth::{Caller, OwnerCaller};
use crate::engine::{parse_date, Engine};
use crate::model::BookingStatus;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gateway_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, gateway_token: Option<String>) -> Self {
        Self {
            engine,
            gateway_token: gateway_token.map(Arc::from),
        }
    }
}

/// Booking routes under `/api/bookings`, plus `/healthz`.
pub fn router(state: AppState) -> Router {
    let bookings = Router::new()
        .route("/", post(create_booking))
        .route("/create", post(create_booking))
        .route("/mine", get(renter_bookings))
        .route("/user", get(renter_bookings))
        .route("/owner", get(owner_bookings))
        .route("/status", post(change_status))
        .route("/change-status", post(change_status))
        .route("/check-availability", post(check_availability))
        .route("/availability", get(vehicle_availability))
        .route("/booked-dates", get(booked_dates));

    Router::new()
        .nest("/api/bookings", bookings)
        .route("/healthz", get(|| async { "ok" }))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => route.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(crate::observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(start.elapsed().as_secs_f64());
    response
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn create_booking(
    caller: Caller,
    State(state): State<AppState>,
    body: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let req = json_body(body)?;
    let start = parse_date(&req.pickup_date)?;
    let end = parse_date(&req.return_date)?;
    let booking = state
        .engine
        .create_booking(&req.vehicle_id, &caller.user_id, start, end)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BookingResponse {
            success: true,
            booking,
        }),
    ))
}

async fn renter_bookings(caller: Caller, State(state): State<AppState>) -> Json<BookingListResponse> {
    let bookings = state.engine.list_bookings_for_renter(&caller.user_id).await;
    Json(BookingListResponse {
        success: true,
        bookings,
    })
}

async fn owner_bookings(
    OwnerCaller(owner): OwnerCaller,
    State(state): State<AppState>,
) -> Result<Json<BookingListResponse>, ApiError> {
    let bookings = state.engine.list_bookings_for_owner(&owner.user_id).await?;
    Ok(Json(BookingListResponse {
        success: true,
        bookings,
    }))
}

async fn change_status(
    OwnerCaller(owner): OwnerCaller,
    State(state): State<AppState>,
    body: Result<Json<ChangeStatusRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let req = json_body(body)?;
    let booking_id: Ulid = req
        .booking_id
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid booking id: {}", req.booking_id)))?;
    let status: BookingStatus = req.status.parse().map_err(ApiError::BadRequest)?;

    let booking = state
        .engine
        .change_status(booking_id, &owner.user_id, status)
        .await?;
    let message = match booking.status {
        BookingStatus::Pending => "Booking is still pending",
        BookingStatus::Confirmed => "Booking confirmed",
        BookingStatus::Cancelled => "Booking cancelled",
    };
    Ok(Json(StatusResponse {
        success: true,
        message: message.to_string(),
        booking,
    }))
}

async fn check_availability(
    State(state): State<AppState>,
    body: Result<Json<CheckAvailabilityRequest>, JsonRejection>,
) -> Result<Json<AvailableCarsResponse>, ApiError> {
    let req = json_body(body)?;
    let start = parse_date(&req.pickup_date)?;
    let end = parse_date(&req.return_date)?;
    let location = req.location.as_deref().filter(|l| !l.trim().is_empty());
    let available_cars = state.engine.available_vehicles(location, start, end).await?;
    Ok(Json(AvailableCarsResponse {
        success: true,
        available_cars,
    }))
}

async fn vehicle_availability(
    State(state): State<AppState>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let q = query_params(query)?;
    let start = parse_date(&q.pickup_date)?;
    let end = parse_date(&q.return_date)?;
    let available = state.engine.is_available(&q.vehicle_id, start, end).await?;
    Ok(Json(AvailabilityResponse {
        success: true,
        available,
    }))
}

async fn booked_dates(
    State(state): State<AppState>,
    query: Result<Query<BookedDatesQuery>, QueryRejection>,
) -> Result<Json<BookedDatesResponse>, ApiError> {
    let q = query_params(query)?;
    let from = parse_date(&q.from)?;
    let to = parse_date(&q.to)?;
    let ranges = state.engine.booked_ranges(&q.vehicle_id, from, to).await?;
    Ok(Json(BookedDatesResponse {
        success: true,
        ranges,
    }))
}
