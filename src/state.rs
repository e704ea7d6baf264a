//! Durable engine state.
//!
//! Every field the decision engine needs across process restarts lives in a
//! key-value store behind the [`KeyValueStore`] trait: the last accepted
//! fix, the stop/move anchor, the stopped flag, sync bookkeeping, and the
//! tracking configuration itself. All values are serialized to JSON strings
//! under namespaced keys; getters tolerate missing or corrupt entries by
//! returning the absent value rather than failing the engine.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::options::{TrackingOptions, TripOptions};
use crate::Fix;

const KEY_LAST_LOCATION: &str = "track-lastLocation";
const KEY_LAST_MOVED_LOCATION: &str = "track-lastMovedLocation";
const KEY_LAST_MOVED_AT: &str = "track-lastMovedAt";
const KEY_STOPPED: &str = "track-stopped";
const KEY_LAST_SENT_AT: &str = "track-lastSentAt";
const KEY_CAN_EXIT: &str = "track-canExit";
const KEY_LAST_FAILED_STOPPED_LOCATION: &str = "track-lastFailedStoppedLocation";
const KEY_TRACKING: &str = "track-tracking";
const KEY_TRACKING_OPTIONS: &str = "track-trackingOptions";
const KEY_TRIP_OPTIONS: &str = "track-tripOptions";

/// Durable string-keyed storage for engine state and configuration.
///
/// Implementations must be safe to call from any task; the engine
/// serializes its own access, but one-shot API calls may read settings
/// concurrently.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
    /// Write `value` under `key`; `None` removes the entry.
    fn set(&self, key: &str, value: Option<&str>);
}

/// In-memory store. The default backing for tests and for hosts that
/// supply their own persistence at a different layer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: KeyValueStore> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Option<&str>) {
        (**self).set(key, value)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .ok()
            .and_then(|map| map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<&str>) {
        if let Ok(mut map) = self.entries.write() {
            match value {
                Some(value) => map.insert(key.to_string(), value.to_string()),
                None => map.remove(key),
            };
        }
    }
}

/// Typed view over the persistent engine state.
///
/// Owned exclusively by the update orchestrator and the sync throttle; the
/// transmission collaborator never touches it directly.
pub struct TrackingState<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> TrackingState<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("[TrackingState] Discarding corrupt entry | key = {}; error = {}", key, err);
                None
            }
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: Option<&T>) {
        match value {
            Some(value) => match serde_json::to_string(value) {
                Ok(raw) => self.store.set(key, Some(&raw)),
                Err(err) => warn!("[TrackingState] Failed to serialize | key = {}; error = {}", key, err),
            },
            None => self.store.set(key, None),
        }
    }

    /// Last accepted valid fix, from any source.
    pub fn last_location(&self) -> Option<Fix> {
        self.get_json::<Fix>(KEY_LAST_LOCATION).filter(Fix::is_valid)
    }

    pub fn set_last_location(&self, fix: &Fix) {
        if fix.is_valid() {
            self.set_json(KEY_LAST_LOCATION, Some(fix));
        }
    }

    /// Fix the device was last observed to be moving relative to.
    pub fn last_moved_location(&self) -> Option<Fix> {
        self.get_json::<Fix>(KEY_LAST_MOVED_LOCATION).filter(Fix::is_valid)
    }

    pub fn set_last_moved_location(&self, fix: &Fix) {
        if fix.is_valid() {
            self.set_json(KEY_LAST_MOVED_LOCATION, Some(fix));
        }
    }

    /// Timestamp corresponding to [`Self::last_moved_location`].
    pub fn last_moved_at(&self) -> Option<DateTime<Utc>> {
        self.get_json(KEY_LAST_MOVED_AT)
    }

    pub fn set_last_moved_at(&self, at: DateTime<Utc>) {
        self.set_json(KEY_LAST_MOVED_AT, Some(&at));
    }

    /// Current classified stop/move state.
    pub fn stopped(&self) -> bool {
        self.get_json(KEY_STOPPED).unwrap_or(false)
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.set_json(KEY_STOPPED, Some(&stopped));
    }

    /// Last time a fix was transmitted remotely.
    pub fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        self.get_json(KEY_LAST_SENT_AT)
    }

    pub fn set_last_sent_at(&self, at: DateTime<Utc>) {
        self.set_json(KEY_LAST_SENT_AT, Some(&at));
    }

    /// Server-derived hint: the user is inside a geofence/place/home/office,
    /// so exit-based sync is possible.
    pub fn can_exit(&self) -> bool {
        self.get_json(KEY_CAN_EXIT).unwrap_or(false)
    }

    pub fn set_can_exit(&self, can_exit: bool) {
        self.set_json(KEY_CAN_EXIT, Some(&can_exit));
    }

    /// A stopped fix whose remote sync failed, pending replay.
    pub fn last_failed_stopped_location(&self) -> Option<Fix> {
        self.get_json::<Fix>(KEY_LAST_FAILED_STOPPED_LOCATION)
            .filter(Fix::is_valid)
    }

    pub fn set_last_failed_stopped_location(&self, fix: Option<&Fix>) {
        match fix {
            Some(fix) if fix.is_valid() => self.set_json(KEY_LAST_FAILED_STOPPED_LOCATION, Some(fix)),
            Some(_) => {}
            None => self.set_json::<Fix>(KEY_LAST_FAILED_STOPPED_LOCATION, None),
        }
    }

    /// Whether tracking is currently enabled.
    pub fn tracking(&self) -> bool {
        self.get_json(KEY_TRACKING).unwrap_or(false)
    }

    pub fn set_tracking(&self, tracking: bool) {
        self.set_json(KEY_TRACKING, Some(&tracking));
    }

    /// The active tracking configuration; the default preset when none has
    /// been stored.
    pub fn tracking_options(&self) -> TrackingOptions {
        self.get_json(KEY_TRACKING_OPTIONS).unwrap_or_default()
    }

    pub fn set_tracking_options(&self, options: &TrackingOptions) {
        self.set_json(KEY_TRACKING_OPTIONS, Some(options));
    }

    /// Options for the active trip, if one is live.
    pub fn trip_options(&self) -> Option<TripOptions> {
        self.get_json(KEY_TRIP_OPTIONS)
    }

    pub fn set_trip_options(&self, options: Option<&TripOptions>) {
        self.set_json(KEY_TRIP_OPTIONS, options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TripMode;
    use crate::Coordinate;
    use chrono::TimeZone;

    fn fix_at(latitude: f64, longitude: f64) -> Fix {
        Fix::new(
            Coordinate::new(latitude, longitude),
            10.0,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_absent_fields_default() {
        let state = TrackingState::new(MemoryStore::new());
        assert!(state.last_location().is_none());
        assert!(state.last_moved_at().is_none());
        assert!(!state.stopped());
        assert!(!state.can_exit());
        assert!(!state.tracking());
        assert!(state.last_failed_stopped_location().is_none());
    }

    #[test]
    fn test_fix_round_trip() {
        let state = TrackingState::new(MemoryStore::new());
        let fix = fix_at(40.7128, -74.0060);
        state.set_last_location(&fix);
        assert_eq!(state.last_location(), Some(fix));
    }

    #[test]
    fn test_invalid_fix_not_persisted() {
        let state = TrackingState::new(MemoryStore::new());
        let invalid = Fix::new(Coordinate::new(91.0, 0.0), 10.0, Utc::now());
        state.set_last_location(&invalid);
        assert!(state.last_location().is_none());
    }

    #[test]
    fn test_failed_stopped_location_clears() {
        let state = TrackingState::new(MemoryStore::new());
        let fix = fix_at(40.0, -73.0);
        state.set_last_failed_stopped_location(Some(&fix));
        assert_eq!(state.last_failed_stopped_location(), Some(fix));
        state.set_last_failed_stopped_location(None);
        assert!(state.last_failed_stopped_location().is_none());
    }

    #[test]
    fn test_corrupt_entry_is_discarded() {
        let store = MemoryStore::new();
        store.set(KEY_STOPPED, Some("not json"));
        store.set(KEY_LAST_LOCATION, Some("{\"bogus\":1}"));
        let state = TrackingState::new(store);
        assert!(!state.stopped());
        assert!(state.last_location().is_none());
    }

    #[test]
    fn test_restart_resume_from_same_store() {
        let store = std::sync::Arc::new(MemoryStore::new());
        {
            let state = TrackingState::new(std::sync::Arc::clone(&store));
            state.set_stopped(true);
            state.set_tracking(true);
            state.set_tracking_options(&TrackingOptions::continuous());
            state.set_last_location(&fix_at(40.0, -73.0));
        }

        // A fresh typed view over the same store sees identical state.
        let reopened = TrackingState::new(store);
        assert!(reopened.stopped());
        assert!(reopened.tracking());
        assert_eq!(reopened.tracking_options(), TrackingOptions::continuous());
        assert_eq!(reopened.last_location(), Some(fix_at(40.0, -73.0)));
    }

    #[test]
    fn test_trip_options_round_trip() {
        let state = TrackingState::new(MemoryStore::new());
        let trip = TripOptions {
            external_id: "trip-1".to_string(),
            destination_geofence_tag: Some("store".to_string()),
            destination_geofence_external_id: None,
            mode: TripMode::Car,
        };
        state.set_trip_options(Some(&trip));
        assert_eq!(state.trip_options(), Some(trip));
        state.set_trip_options(None);
        assert!(state.trip_options().is_none());
    }
}
