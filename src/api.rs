//! Transmission client for track calls.
//!
//! The engine only depends on the [`TransmissionClient`] trait; the
//! [`HttpTransmissionClient`] implements it over a pooled HTTP client with
//! typed deserialization. Track failures come back as [`Status`] values so
//! the engine can decide replay without inspecting transport details.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Status;
use crate::models::{Beacon, Event, Geofence, User};
use crate::options::TripOptions;
use crate::{Coordinate, Fix, LocationSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A structured track call: the fix plus the flags the server needs to
/// interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    pub fix: Fix,
    pub stopped: bool,
    pub foreground: bool,
    pub source: LocationSource,
    pub replayed: bool,
    /// Identifiers of synced beacons the device is currently near.
    pub nearby_beacons: Vec<String>,
    /// Ask the server for geofences near the fix, for client mirroring.
    pub include_nearby_geofences: bool,
    pub trip_options: Option<TripOptions>,
}

impl TrackRequest {
    /// Build the JSON parameters for the track call. `now` dates the fix
    /// for background updates (`updatedAtMsDiff`).
    pub fn to_params(&self, now: DateTime<Utc>) -> Value {
        // The server rejects non-positive accuracy; clamp to 1 m.
        let accuracy = if self.fix.horizontal_accuracy > 0.0 {
            self.fix.horizontal_accuracy
        } else {
            1.0
        };

        let mut params = json!({
            "latitude": self.fix.coordinate.latitude,
            "longitude": self.fix.coordinate.longitude,
            "accuracy": accuracy,
            "foreground": self.foreground,
            "stopped": self.stopped,
            "replayed": self.replayed,
            "source": self.source.as_str(),
        });

        if let Some(altitude) = self.fix.altitude {
            params["altitude"] = json!(altitude);
        }
        if let Some(speed) = self.fix.speed {
            params["speed"] = json!(speed);
        }
        if let Some(course) = self.fix.course {
            params["course"] = json!(course);
        }
        if !self.foreground {
            params["updatedAtMsDiff"] = json!((now - self.fix.timestamp).num_milliseconds());
        }
        if self.include_nearby_geofences {
            params["nearbyGeofences"] = json!(true);
        }
        if !self.nearby_beacons.is_empty() {
            params["nearbyBeacons"] = json!(self.nearby_beacons);
        }
        if let Some(trip) = &self.trip_options {
            params["tripOptions"] = serde_json::to_value(trip).unwrap_or(Value::Null);
        }

        params
    }
}

/// Parsed result of a successful track call.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nearby_geofences: Option<Vec<Geofence>>,
}

#[derive(Debug, Deserialize)]
struct SearchBeaconsResponse {
    #[serde(default)]
    beacons: Vec<Beacon>,
}

/// Remote endpoint accepting track calls and beacon searches.
pub trait TransmissionClient: Send + Sync + 'static {
    /// Transmit a classified fix and return the server's response.
    fn track(
        &self,
        request: TrackRequest,
    ) -> impl Future<Output = Result<TrackResponse, Status>> + Send;

    /// Find server-known beacons near a coordinate.
    fn search_beacons(
        &self,
        near: Coordinate,
        radius: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Beacon>, Status>> + Send;
}

/// HTTP implementation of [`TransmissionClient`].
pub struct HttpTransmissionClient {
    client: Client,
    base_url: String,
    publishable_key: String,
}

impl HttpTransmissionClient {
    /// Create a client against `base_url`, authenticating every request
    /// with `publishable_key`.
    pub fn new(base_url: impl Into<String>, publishable_key: impl Into<String>) -> Result<Self, Status> {
        let client = Client::builder()
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                warn!("[HttpClient] Failed to create HTTP client: {}", err);
                Status::Unknown
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            publishable_key: publishable_key.into(),
        })
    }

    /// Map an HTTP status code to the error taxonomy.
    fn status_for(code: StatusCode) -> Status {
        match code.as_u16() {
            400 => Status::BadRequest,
            401 | 403 => Status::Unauthorized,
            429 => Status::RateLimited,
            code if (500..600).contains(&code) => Status::ServerError(code),
            _ => Status::Unknown,
        }
    }

    async fn post_json(&self, url: String, params: Value) -> Result<Value, Status> {
        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.publishable_key)
            .json(&params)
            .send()
            .await
            .map_err(|err| {
                warn!("[HttpClient] Request error | url = {}; error = {}", url, err);
                Status::NetworkError
            })?;

        let code = response.status();
        if !code.is_success() {
            debug!("[HttpClient] HTTP {} | url = {}", code, url);
            return Err(Self::status_for(code));
        }

        response.json().await.map_err(|err| {
            warn!("[HttpClient] Parse error | url = {}; error = {}", url, err);
            Status::Unknown
        })
    }

    async fn get_json(&self, url: String) -> Result<Value, Status> {
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.publishable_key)
            .send()
            .await
            .map_err(|err| {
                warn!("[HttpClient] Request error | url = {}; error = {}", url, err);
                Status::NetworkError
            })?;

        let code = response.status();
        if !code.is_success() {
            debug!("[HttpClient] HTTP {} | url = {}", code, url);
            return Err(Self::status_for(code));
        }

        response.json().await.map_err(|err| {
            warn!("[HttpClient] Parse error | url = {}; error = {}", url, err);
            Status::Unknown
        })
    }
}

impl TransmissionClient for HttpTransmissionClient {
    async fn track(&self, request: TrackRequest) -> Result<TrackResponse, Status> {
        let url = format!("{}/v1/track", self.base_url);
        let params = request.to_params(Utc::now());
        let body = self.post_json(url, params).await?;
        serde_json::from_value(body).map_err(|err| {
            warn!("[HttpClient] Track response parse error: {}", err);
            Status::Unknown
        })
    }

    async fn search_beacons(
        &self,
        near: Coordinate,
        radius: u32,
        limit: u32,
    ) -> Result<Vec<Beacon>, Status> {
        let url = format!(
            "{}/v1/search/beacons?near={},{}&radius={}&limit={}",
            self.base_url, near.latitude, near.longitude, radius, limit
        );
        let body = self.get_json(url).await?;
        let parsed: SearchBeaconsResponse = serde_json::from_value(body).map_err(|err| {
            warn!("[HttpClient] Beacon search parse error: {}", err);
            Status::Unknown
        })?;
        Ok(parsed.beacons)
    }
}
