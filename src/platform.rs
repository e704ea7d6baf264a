//! Platform collaborator boundaries.
//!
//! The engine never talks to location or Bluetooth hardware directly; it
//! drives a [`LocationProvider`] and a [`BeaconRanger`] supplied at
//! construction. Hosts push fixes and region events back into the engine
//! through its `handle_*` entry points, so these traits carry only the
//! command surface.

use std::future::Future;

use crate::error::Status;
use crate::models::Beacon;
use crate::options::DesiredAccuracy;
use crate::Coordinate;

/// Location permission level reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    NotDetermined,
    Denied,
    GrantedForeground,
    GrantedBackground,
}

impl Authorization {
    /// Whether fixes can be requested at all.
    pub fn is_granted(&self) -> bool {
        matches!(self, Authorization::GrantedForeground | Authorization::GrantedBackground)
    }
}

/// A circular region the platform monitors on the engine's behalf.
///
/// Regions are never mutated in place; replacement is always
/// remove-then-add through the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredRegion {
    /// Identifier encoding the region's purpose; see [`crate::regions`].
    pub identifier: String,
    pub center: Coordinate,
    /// Radius in meters. 0 for beacon regions, whose extent is
    /// proximity-defined by the hardware.
    pub radius: f64,
}

/// Platform location services: one-shot requests, the low-power continuous
/// source, auxiliary signal sources, and region monitoring.
pub trait LocationProvider: Send + Sync + 'static {
    /// Current permission level.
    fn authorization(&self) -> Authorization;

    /// Set the accuracy tier for subsequent fixes.
    fn set_desired_accuracy(&self, accuracy: DesiredAccuracy);

    /// Ask for a single fix; the host delivers it through
    /// `TrackingEngine::handle_location`.
    fn request_location(&self);

    /// Start the low-power continuous location source.
    fn start_continuous_updates(&self);

    /// Stop the low-power continuous location source.
    fn stop_continuous_updates(&self);

    /// Show or hide the platform tracking indicator.
    fn set_indicator_visible(&self, visible: bool);

    fn start_monitoring_visits(&self);
    fn stop_monitoring_visits(&self);

    fn start_monitoring_significant_changes(&self);
    fn stop_monitoring_significant_changes(&self);

    /// Regions currently monitored for this process.
    fn monitored_regions(&self) -> Vec<MonitoredRegion>;

    fn start_monitoring_region(&self, region: MonitoredRegion);

    fn stop_monitoring_region(&self, identifier: &str);

    /// Ask the platform whether the device is currently inside the region;
    /// the answer arrives through `TrackingEngine::handle_region_state`.
    fn request_region_state(&self, identifier: &str);
}

/// Bounded-window Bluetooth beacon ranging.
pub trait BeaconRanger: Send + Sync + 'static {
    /// Range the given beacons and return the identifiers currently in
    /// range, or [`Status::BluetoothUnavailable`].
    fn range_beacons(
        &self,
        beacons: Vec<Beacon>,
    ) -> impl Future<Output = Result<Vec<String>, Status>> + Send;
}
