//! Tracking configuration.
//!
//! An options bundle is immutable per activation: it is persisted when
//! tracking starts and read back on every update pass. The presets are
//! parameter bundles tuned for different battery profiles; they contain no
//! logic of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The accuracy tier requested from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredAccuracy {
    High,
    Medium,
    Low,
}

/// Which failed location updates to replay to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayOption {
    /// Replay failed stopped-fix transmissions on the next sync opportunity.
    Stops,
    /// Replay nothing.
    None,
}

/// Which location updates to sync to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync all location updates.
    #[serde(rename = "all")]
    All,
    /// Sync only stops and exits.
    #[serde(rename = "stopsAndExits")]
    StopsAndExits,
    /// Sync no location updates.
    #[serde(rename = "none")]
    None,
}

/// Options used to configure background tracking.
///
/// Intervals are in seconds; 0 disables periodic updates in that state.
/// `stop_distance` (meters) and `stop_duration` (seconds) jointly define
/// the stopped/moving threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingOptions {
    /// Desired location update interval in seconds when stopped. 0 shuts
    /// updates down when stopped.
    pub desired_stopped_update_interval: u32,
    /// Desired location update interval in seconds when moving.
    pub desired_moving_update_interval: u32,
    /// Minimum spacing between remote syncs, in seconds.
    pub desired_sync_interval: u32,
    /// Desired accuracy of location updates.
    pub desired_accuracy: DesiredAccuracy,
    /// With `stop_distance`, the duration in seconds after which the device
    /// is considered stopped.
    pub stop_duration: u32,
    /// With `stop_duration`, the distance in meters within which the device
    /// is considered stopped.
    pub stop_distance: u32,
    /// Start tracking automatically once this instant has passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_tracking_after: Option<DateTime<Utc>>,
    /// Stop tracking automatically once this instant has passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_tracking_after: Option<DateTime<Utc>>,
    /// Which failed location updates to replay.
    pub replay: ReplayOption,
    /// Which location updates to sync.
    pub sync_locations: SyncMode,
    /// Whether to show the platform tracking indicator.
    pub show_indicator: bool,
    /// Whether to keep a client geofence around the current location when
    /// stopped.
    pub use_stopped_geofence: bool,
    /// Radius in meters of the stopped-state client geofence.
    pub stopped_geofence_radius: u32,
    /// Whether to keep a client geofence around the current location when
    /// moving.
    pub use_moving_geofence: bool,
    /// Radius in meters of the moving-state client geofence.
    pub moving_geofence_radius: u32,
    /// Whether to mirror nearby server geofences on the client.
    pub sync_geofences: bool,
    /// Whether to use the platform visit monitoring service.
    pub use_visits: bool,
    /// Whether to use the platform significant-change location service.
    pub use_significant_location_changes: bool,
    /// Whether to monitor synced beacon regions.
    pub use_beacons: bool,
}

impl TrackingOptions {
    /// Updates about every 30 seconds while moving or stopped. Moderate
    /// battery usage; shows the tracking indicator.
    pub fn continuous() -> Self {
        Self {
            desired_stopped_update_interval: 30,
            desired_moving_update_interval: 30,
            desired_sync_interval: 20,
            desired_accuracy: DesiredAccuracy::High,
            stop_duration: 140,
            stop_distance: 70,
            start_tracking_after: None,
            stop_tracking_after: None,
            replay: ReplayOption::None,
            sync_locations: SyncMode::All,
            show_indicator: true,
            use_stopped_geofence: false,
            stopped_geofence_radius: 0,
            use_moving_geofence: false,
            moving_geofence_radius: 0,
            sync_geofences: false,
            use_visits: false,
            use_significant_location_changes: false,
            use_beacons: false,
        }
    }

    /// Updates about every 2.5 minutes when moving and shuts down when
    /// stopped to save battery. Once stopped, the device must leave the
    /// stopped-state bubble geofence to wake tracking back up.
    pub fn responsive() -> Self {
        Self {
            desired_stopped_update_interval: 0,
            desired_moving_update_interval: 150,
            desired_sync_interval: 20,
            desired_accuracy: DesiredAccuracy::Medium,
            stop_duration: 140,
            stop_distance: 70,
            start_tracking_after: None,
            stop_tracking_after: None,
            replay: ReplayOption::Stops,
            sync_locations: SyncMode::All,
            show_indicator: false,
            use_stopped_geofence: true,
            stopped_geofence_radius: 100,
            use_moving_geofence: false,
            moving_geofence_radius: 100,
            sync_geofences: true,
            use_visits: true,
            use_significant_location_changes: true,
            use_beacons: false,
        }
    }

    /// Relies on visit events to update only on stops and exits. Lowest
    /// battery usage.
    pub fn efficient() -> Self {
        Self {
            desired_stopped_update_interval: 0,
            desired_moving_update_interval: 0,
            desired_sync_interval: 20,
            desired_accuracy: DesiredAccuracy::Medium,
            stop_duration: 140,
            stop_distance: 70,
            start_tracking_after: None,
            stop_tracking_after: None,
            replay: ReplayOption::Stops,
            sync_locations: SyncMode::All,
            show_indicator: false,
            use_stopped_geofence: false,
            stopped_geofence_radius: 0,
            use_moving_geofence: false,
            moving_geofence_radius: 0,
            sync_geofences: true,
            use_visits: true,
            use_significant_location_changes: false,
            use_beacons: false,
        }
    }
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self::efficient()
    }
}

/// The travel mode for an active trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripMode {
    Foot,
    Bike,
    Car,
}

/// Options describing an active trip, persisted alongside the tracking
/// options and attached to every track request while the trip is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripOptions {
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_geofence_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_geofence_external_id: Option<String>,
    pub mode: TripMode,
}
