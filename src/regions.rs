//! Client-side region management.
//!
//! Monitored regions are tagged by purpose through their identifier so each
//! class can be replaced without disturbing the others: the ephemeral
//! bubble around the current stop/move location, geofences mirrored from
//! the server, and synced beacon regions. Every replace operation is
//! remove-then-add and idempotent.

use log::debug;
use uuid::Uuid;

use crate::models::{Beacon, Geofence};
use crate::platform::{LocationProvider, MonitoredRegion};
use crate::Coordinate;

const IDENTIFIER_PREFIX: &str = "track_";
const BUBBLE_PREFIX: &str = "track_bubble_";
const SYNCED_GEOFENCE_PREFIX: &str = "track_geofence_";
const SYNCED_BEACON_PREFIX: &str = "track_beacon_";

/// The purpose encoded in a monitored region's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Ephemeral geofence around the current stop/move location.
    Bubble,
    /// A server geofence mirrored on the client, indexed by list position.
    SyncedGeofence,
    /// A synced beacon region, keyed by the beacon's stable identifier.
    SyncedBeacon,
}

impl RegionKind {
    /// Parse the kind out of a region identifier. `None` for regions this
    /// crate does not own.
    pub fn of(identifier: &str) -> Option<RegionKind> {
        if identifier.starts_with(BUBBLE_PREFIX) {
            Some(RegionKind::Bubble)
        } else if identifier.starts_with(SYNCED_GEOFENCE_PREFIX) {
            Some(RegionKind::SyncedGeofence)
        } else if identifier.starts_with(SYNCED_BEACON_PREFIX) {
            Some(RegionKind::SyncedBeacon)
        } else {
            None
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            RegionKind::Bubble => BUBBLE_PREFIX,
            RegionKind::SyncedGeofence => SYNCED_GEOFENCE_PREFIX,
            RegionKind::SyncedBeacon => SYNCED_BEACON_PREFIX,
        }
    }
}

/// Fresh identifier for a bubble region. Unique per call, so a stale
/// bubble can never collide with its replacement.
pub fn bubble_identifier() -> String {
    format!("{}{}", BUBBLE_PREFIX, Uuid::new_v4())
}

/// Identifier for the synced geofence at `index` in the server list.
pub fn synced_geofence_identifier(index: usize) -> String {
    format!("{}{}", SYNCED_GEOFENCE_PREFIX, index)
}

/// Identifier for the synced region of the beacon with `beacon_id`.
pub fn synced_beacon_identifier(beacon_id: &str) -> String {
    format!("{}{}", SYNCED_BEACON_PREFIX, beacon_id)
}

/// Recover the beacon identifier from a synced beacon region identifier.
pub fn beacon_id_of(identifier: &str) -> Option<&str> {
    identifier.strip_prefix(SYNCED_BEACON_PREFIX)
}

fn remove_kind<P: LocationProvider>(provider: &P, kind: RegionKind) {
    for region in provider.monitored_regions() {
        if region.identifier.starts_with(kind.prefix()) {
            provider.stop_monitoring_region(&region.identifier);
        }
    }
}

/// Remove any existing bubble, then (only while tracking) monitor a new
/// one centered at `center`.
pub fn replace_bubble<P: LocationProvider>(
    provider: &P,
    tracking: bool,
    center: Coordinate,
    radius: u32,
) {
    remove_kind(provider, RegionKind::Bubble);
    if !tracking {
        return;
    }
    provider.start_monitoring_region(MonitoredRegion {
        identifier: bubble_identifier(),
        center,
        radius: radius as f64,
    });
}

/// Remove the bubble without replacing it.
pub fn remove_bubble<P: LocationProvider>(provider: &P) {
    remove_kind(provider, RegionKind::Bubble);
}

/// Remove all synced geofence regions, then (only while tracking with
/// geofence sync enabled) monitor one region per server geofence.
pub fn replace_synced_geofences<P: LocationProvider>(
    provider: &P,
    tracking: bool,
    sync_enabled: bool,
    geofences: &[Geofence],
) {
    remove_kind(provider, RegionKind::SyncedGeofence);
    if !tracking || !sync_enabled {
        return;
    }
    for (index, geofence) in geofences.iter().enumerate() {
        let identifier = synced_geofence_identifier(index);
        let center = geofence.geometry.center();
        let radius = geofence.geometry.radius();
        provider.start_monitoring_region(MonitoredRegion {
            identifier: identifier.clone(),
            center,
            radius,
        });
        debug!(
            "[Regions] Synced geofence | latitude = {}; longitude = {}; radius = {}; identifier = {}",
            center.latitude, center.longitude, radius, identifier
        );
    }
}

/// Remove all synced geofence regions.
pub fn remove_synced_geofences<P: LocationProvider>(provider: &P) {
    remove_kind(provider, RegionKind::SyncedGeofence);
}

/// Remove all synced beacon regions, then (only while tracking with
/// beacons enabled) monitor one region per beacon and immediately query
/// containment, so beacons the device is already inside are picked up
/// before any enter/exit event fires.
pub fn replace_synced_beacons<P: LocationProvider>(
    provider: &P,
    tracking: bool,
    beacons_enabled: bool,
    beacons: &[Beacon],
) {
    remove_kind(provider, RegionKind::SyncedBeacon);
    if !tracking || !beacons_enabled {
        return;
    }
    for beacon in beacons {
        let identifier = synced_beacon_identifier(&beacon.id);
        provider.start_monitoring_region(MonitoredRegion {
            identifier: identifier.clone(),
            center: beacon.coordinate,
            radius: 0.0,
        });
        provider.request_region_state(&identifier);
        debug!(
            "[Regions] Synced beacon | identifier = {}; uuid = {}; major = {}; minor = {}",
            identifier, beacon.uuid, beacon.major, beacon.minor
        );
    }
}

/// Remove all synced beacon regions.
pub fn remove_synced_beacons<P: LocationProvider>(provider: &P) {
    remove_kind(provider, RegionKind::SyncedBeacon);
}

/// Remove every region this crate owns, leaving foreign regions alone.
pub fn remove_all<P: LocationProvider>(provider: &P) {
    for region in provider.monitored_regions() {
        if region.identifier.starts_with(IDENTIFIER_PREFIX) {
            provider.stop_monitoring_region(&region.identifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Geometry;
    use crate::options::DesiredAccuracy;
    use crate::platform::Authorization;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RegionsOnlyProvider {
        regions: Mutex<Vec<MonitoredRegion>>,
        state_requests: Mutex<Vec<String>>,
    }

    impl LocationProvider for RegionsOnlyProvider {
        fn authorization(&self) -> Authorization {
            Authorization::GrantedBackground
        }
        fn set_desired_accuracy(&self, _accuracy: DesiredAccuracy) {}
        fn request_location(&self) {}
        fn start_continuous_updates(&self) {}
        fn stop_continuous_updates(&self) {}
        fn set_indicator_visible(&self, _visible: bool) {}
        fn start_monitoring_visits(&self) {}
        fn stop_monitoring_visits(&self) {}
        fn start_monitoring_significant_changes(&self) {}
        fn stop_monitoring_significant_changes(&self) {}

        fn monitored_regions(&self) -> Vec<MonitoredRegion> {
            self.regions.lock().unwrap().clone()
        }

        fn start_monitoring_region(&self, region: MonitoredRegion) {
            self.regions.lock().unwrap().push(region);
        }

        fn stop_monitoring_region(&self, identifier: &str) {
            self.regions.lock().unwrap().retain(|r| r.identifier != identifier);
        }

        fn request_region_state(&self, identifier: &str) {
            self.state_requests.lock().unwrap().push(identifier.to_string());
        }
    }

    fn geofence(id: &str, radius: f64) -> Geofence {
        Geofence {
            id: id.to_string(),
            description: id.to_string(),
            tag: None,
            external_id: None,
            geometry: Geometry::Circle {
                center: Coordinate::new(40.0, -73.0),
                radius,
            },
        }
    }

    fn beacon(id: &str) -> Beacon {
        Beacon {
            id: id.to_string(),
            tag: None,
            external_id: None,
            uuid: "426C7565-4368-6172-6D42-6561636F6E73".to_string(),
            major: "100".to_string(),
            minor: "1".to_string(),
            coordinate: Coordinate::new(40.0, -73.0),
        }
    }

    #[test]
    fn test_identifier_scheme() {
        assert_eq!(RegionKind::of(&bubble_identifier()), Some(RegionKind::Bubble));
        assert_eq!(RegionKind::of(&synced_geofence_identifier(3)), Some(RegionKind::SyncedGeofence));
        assert_eq!(RegionKind::of(&synced_beacon_identifier("b1")), Some(RegionKind::SyncedBeacon));
        assert_eq!(RegionKind::of("someone_elses_region"), None);
        assert_eq!(beacon_id_of(&synced_beacon_identifier("b1")), Some("b1"));
    }

    #[test]
    fn test_bubble_replacement_is_idempotent() {
        let provider = RegionsOnlyProvider::default();
        let center = Coordinate::new(40.0, -73.0);

        replace_bubble(&provider, true, center, 150);
        replace_bubble(&provider, true, center, 150);

        let regions = provider.monitored_regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].center, center);
        assert_eq!(regions[0].radius, 150.0);
        assert_eq!(RegionKind::of(&regions[0].identifier), Some(RegionKind::Bubble));
    }

    #[test]
    fn test_bubble_not_added_when_not_tracking() {
        let provider = RegionsOnlyProvider::default();
        replace_bubble(&provider, true, Coordinate::new(40.0, -73.0), 100);
        assert_eq!(provider.monitored_regions().len(), 1);

        // Replacing while disabled removes the stale bubble and adds nothing.
        replace_bubble(&provider, false, Coordinate::new(41.0, -73.0), 100);
        assert!(provider.monitored_regions().is_empty());
    }

    #[test]
    fn test_synced_geofences_diff() {
        let provider = RegionsOnlyProvider::default();
        replace_synced_geofences(
            &provider,
            true,
            true,
            &[geofence("a", 100.0), geofence("b", 200.0), geofence("c", 300.0)],
        );
        assert_eq!(provider.monitored_regions().len(), 3);

        // A shorter list replaces the longer one wholesale.
        replace_synced_geofences(&provider, true, true, &[geofence("d", 50.0)]);
        let regions = provider.monitored_regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].identifier, synced_geofence_identifier(0));
        assert_eq!(regions[0].radius, 50.0);
    }

    #[test]
    fn test_synced_geofences_respect_config() {
        let provider = RegionsOnlyProvider::default();
        replace_synced_geofences(&provider, true, false, &[geofence("a", 100.0)]);
        assert!(provider.monitored_regions().is_empty());

        replace_synced_geofences(&provider, false, true, &[geofence("a", 100.0)]);
        assert!(provider.monitored_regions().is_empty());
    }

    #[test]
    fn test_synced_beacons_query_containment() {
        let provider = RegionsOnlyProvider::default();
        replace_synced_beacons(&provider, true, true, &[beacon("b1"), beacon("b2")]);

        assert_eq!(provider.monitored_regions().len(), 2);
        let requests = provider.state_requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![synced_beacon_identifier("b1"), synced_beacon_identifier("b2")]
        );
    }

    #[test]
    fn test_replacement_classes_are_independent() {
        let provider = RegionsOnlyProvider::default();
        replace_bubble(&provider, true, Coordinate::new(40.0, -73.0), 100);
        replace_synced_geofences(&provider, true, true, &[geofence("a", 100.0)]);
        replace_synced_beacons(&provider, true, true, &[beacon("b1")]);
        assert_eq!(provider.monitored_regions().len(), 3);

        // Replacing geofences leaves the bubble and beacons alone.
        replace_synced_geofences(&provider, true, true, &[geofence("x", 10.0), geofence("y", 20.0)]);
        assert_eq!(provider.monitored_regions().len(), 4);

        remove_bubble(&provider);
        assert_eq!(provider.monitored_regions().len(), 3);

        remove_all(&provider);
        assert!(provider.monitored_regions().is_empty());
    }

    #[test]
    fn test_remove_all_leaves_foreign_regions() {
        let provider = RegionsOnlyProvider::default();
        provider.start_monitoring_region(MonitoredRegion {
            identifier: "app_own_region".to_string(),
            center: Coordinate::new(40.0, -73.0),
            radius: 10.0,
        });
        replace_bubble(&provider, true, Coordinate::new(40.0, -73.0), 100);

        remove_all(&provider);
        let regions = provider.monitored_regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].identifier, "app_own_region");
    }
}
