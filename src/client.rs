use chrono::NaiveDate;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use ulid::Ulid;

use crate::api::{
    AvailabilityResponse, AvailableCarsResponse, BookedDatesResponse, BookingListResponse,
    BookingResponse, ChangeStatusRequest, CheckAvailabilityRequest, CreateBookingRequest,
    ErrorBody, StatusResponse,
};
use crate::auth::{GATEWAY_TOKEN_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
use crate::model::{Booking, BookingStatus, DateSpan, Vehicle};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{status}: {message}")]
    Api { status: StatusCode, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status(),
        }
    }
}

/// Typed HTTP client for the booking API, acting as one identity.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    is_owner: bool,
    gateway_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            is_owner: false,
            gateway_token: None,
        }
    }

    pub fn as_owner(mut self) -> Self {
        self.is_owner = true;
        self
    }

    pub fn with_gateway_token(mut self, token: impl Into<String>) -> Self {
        self.gateway_token = Some(token.into());
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/bookings{path}", self.base_url)
    }

    fn identify(&self, req: RequestBuilder) -> RequestBuilder {
        let mut req = req.header(USER_ID_HEADER, &self.user_id);
        if self.is_owner {
            req = req.header(USER_ROLE_HEADER, "owner");
        }
        if let Some(token) = &self.gateway_token {
            req = req.header(GATEWAY_TOKEN_HEADER, token);
        }
        req
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
        };
        Err(ClientError::Api { status, message })
    }

    pub async fn create_booking(
        &self,
        vehicle_id: &str,
        pickup: NaiveDate,
        ret: NaiveDate,
    ) -> Result<Booking, ClientError> {
        let body = CreateBookingRequest {
            vehicle_id: vehicle_id.to_string(),
            pickup_date: pickup.to_string(),
            return_date: ret.to_string(),
        };
        let resp = self
            .identify(self.http.post(self.url("")))
            .json(&body)
            .send()
            .await?;
        Ok(Self::decode::<BookingResponse>(resp).await?.booking)
    }

    pub async fn my_bookings(&self) -> Result<Vec<Booking>, ClientError> {
        let resp = self.identify(self.http.get(self.url("/mine"))).send().await?;
        Ok(Self::decode::<BookingListResponse>(resp).await?.bookings)
    }

    pub async fn owner_bookings(&self) -> Result<Vec<Booking>, ClientError> {
        let resp = self.identify(self.http.get(self.url("/owner"))).send().await?;
        Ok(Self::decode::<BookingListResponse>(resp).await?.bookings)
    }

    pub async fn change_status(
        &self,
        booking_id: Ulid,
        status: BookingStatus,
    ) -> Result<StatusResponse, ClientError> {
        let body = ChangeStatusRequest {
            booking_id: booking_id.to_string(),
            status: status.as_str().to_string(),
        };
        let resp = self
            .identify(self.http.post(self.url("/status")))
            .json(&body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn available_cars(
        &self,
        location: Option<&str>,
        pickup: NaiveDate,
        ret: NaiveDate,
    ) -> Result<Vec<Vehicle>, ClientError> {
        let body = CheckAvailabilityRequest {
            location: location.map(str::to_string),
            pickup_date: pickup.to_string(),
            return_date: ret.to_string(),
        };
        let resp = self
            .identify(self.http.post(self.url("/check-availability")))
            .json(&body)
            .send()
            .await?;
        Ok(Self::decode::<AvailableCarsResponse>(resp).await?.available_cars)
    }

    pub async fn is_available(
        &self,
        vehicle_id: &str,
        pickup: NaiveDate,
        ret: NaiveDate,
    ) -> Result<bool, ClientError> {
        let resp = self
            .identify(self.http.get(self.url("/availability")))
            .query(&[
                ("vehicleId", vehicle_id.to_string()),
                ("pickupDate", pickup.to_string()),
                ("returnDate", ret.to_string()),
            ])
            .send()
            .await?;
        Ok(Self::decode::<AvailabilityResponse>(resp).await?.available)
    }

    pub async fn booked_dates(
        &self,
        vehicle_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DateSpan>, ClientError> {
        let resp = self
            .identify(self.http.get(self.url("/booked-dates")))
            .query(&[
                ("vehicleId", vehicle_id.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ])
            .send()
            .await?;
        Ok(Self::decode::<BookedDatesResponse>(resp).await?.ranges)
    }
}
