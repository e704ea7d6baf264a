//! # Track Engine
//!
//! Location-tracking client runtime: decides when a device is stopped vs
//! moving, which location fixes are worth persisting and synchronizing, and
//! which client-side regions (bubble geofence, synced geofences, synced
//! beacon regions) should be monitored for low-power wake-ups.
//!
//! This library provides:
//! - Stop/move classification from raw location fixes
//! - Sync throttling with replay of failed stopped-fix transmissions
//! - Idempotent client-side region reconciliation
//! - A tracking state machine with time-window based auto start/stop
//!
//! ## Quick Start
//!
//! ```rust
//! use track_engine::{Coordinate, Fix, TrackingOptions, TrackingState, MemoryStore};
//! use chrono::Utc;
//!
//! let options = TrackingOptions::responsive();
//! let state = TrackingState::new(MemoryStore::new());
//! state.set_tracking_options(&options);
//!
//! let fix = Fix::new(Coordinate::new(40.7128, -74.0060), 10.0, Utc::now());
//! assert!(fix.is_valid());
//! ```

use chrono::{DateTime, Utc};
use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

pub mod api;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod models;
pub mod options;
pub mod platform;
pub mod regions;
pub mod state;
pub mod sync;

pub use api::{HttpTransmissionClient, TrackRequest, TrackResponse, TransmissionClient};
pub use classifier::{classify, Classification};
pub use engine::{TrackingEngine, TrackingObserver};
pub use error::Status;
pub use models::{Beacon, Event, Geofence, Geometry, User};
pub use options::{DesiredAccuracy, ReplayOption, SyncMode, TrackingOptions, TripOptions};
pub use platform::{Authorization, BeaconRanger, LocationProvider, MonitoredRegion};
pub use regions::RegionKind;
pub use state::{KeyValueStore, MemoryStore, TrackingState};
pub use sync::{SyncDecision, SyncInput};

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use track_engine::Coordinate;
/// let coord = Coordinate::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check that latitude and longitude are within range.
    ///
    /// Range bounds are exclusive: the poles and the antimeridian are
    /// rejected along with everything outside them, matching the validity
    /// rule applied to incoming fixes.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude > -90.0
            && self.latitude < 90.0
            && self.longitude > -180.0
            && self.longitude < 180.0
    }

    /// Great-circle distance to another coordinate in meters.
    ///
    /// # Example
    /// ```
    /// use track_engine::Coordinate;
    ///
    /// let london = Coordinate::new(51.5074, -0.1278);
    /// let paris = Coordinate::new(48.8566, 2.3522);
    /// assert!((london.distance_to(&paris) - 343_560.0).abs() < 1000.0); // ~344 km
    /// ```
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let p1 = Point::new(self.longitude, self.latitude);
        let p2 = Point::new(other.longitude, other.latitude);
        Haversine::distance(p1, p2)
    }
}

/// A single reported device location: coordinate, accuracy and timestamp,
/// plus optional motion attributes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub coordinate: Coordinate,
    /// Horizontal accuracy in meters. Must be > 0 for the fix to be valid.
    pub horizontal_accuracy: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
}

impl Fix {
    /// Create a new fix with no optional attributes.
    pub fn new(coordinate: Coordinate, horizontal_accuracy: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            horizontal_accuracy,
            timestamp,
            altitude: None,
            speed: None,
            course: None,
        }
    }

    /// Check fix validity: coordinate in range and horizontal accuracy > 0.
    ///
    /// Invalid fixes are rejected before they reach the classifier.
    pub fn is_valid(&self) -> bool {
        self.coordinate.is_valid()
            && self.horizontal_accuracy.is_finite()
            && self.horizontal_accuracy > 0.0
    }
}

/// Where a location fix came from.
///
/// The source determines "force" semantics: forced fixes bypass the
/// tracking-enabled and staleness gates because they represent explicit
/// user/API intent or a precise proximity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationSource {
    ForegroundRequest,
    BackgroundUpdate,
    Manual,
    VisitArrival,
    VisitDeparture,
    GeofenceEnter,
    GeofenceExit,
    Mock,
    BeaconEnter,
    BeaconExit,
    Unknown,
}

impl LocationSource {
    /// Forced sources always update state and bypass skip-if-not-tracking
    /// and skip-if-stale rules.
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            LocationSource::ForegroundRequest
                | LocationSource::Manual
                | LocationSource::BeaconEnter
                | LocationSource::BeaconExit
        )
    }

    /// Wire name for the source.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::ForegroundRequest => "FOREGROUND_LOCATION",
            LocationSource::BackgroundUpdate => "BACKGROUND_LOCATION",
            LocationSource::Manual => "MANUAL_LOCATION",
            LocationSource::VisitArrival => "VISIT_ARRIVAL",
            LocationSource::VisitDeparture => "VISIT_DEPARTURE",
            LocationSource::GeofenceEnter => "GEOFENCE_ENTER",
            LocationSource::GeofenceExit => "GEOFENCE_EXIT",
            LocationSource::Mock => "MOCK_LOCATION",
            LocationSource::BeaconEnter => "BEACON_ENTER",
            LocationSource::BeaconExit => "BEACON_EXIT",
            LocationSource::Unknown => "UNKNOWN",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
