//! Stop/move classification.
//!
//! Decides whether the device is stopped, given the current fix, the
//! persisted movement anchor (`last_moved_location` / `last_moved_at`) and
//! the configured distance/duration thresholds. The anchor is seeded the
//! first time it is absent and reset whenever displacement exceeds
//! `stop_distance`; a transition into "stopped" freezes the time anchor so
//! duration keeps accumulating against the original stop point.

use chrono::{DateTime, Utc};
use log::debug;

use crate::options::TrackingOptions;
use crate::state::{KeyValueStore, TrackingState};
use crate::{Fix, LocationSource};

/// Result of classifying one fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub stopped: bool,
    /// Displacement from the movement anchor in meters. `f64::MAX` in
    /// degenerate mode (no distance tracking configured).
    pub distance: f64,
    /// Seconds elapsed since the movement anchor. Can be negative for a
    /// backdated forced fix.
    pub duration: f64,
}

/// Classify `current` against the persisted movement anchor.
///
/// Returns `None` when the fix is stale: not forced and strictly older
/// than `last_moved_at`. A stale fix mutates no state.
///
/// `now` is the wall clock, used only as a duration fallback when the fix
/// timestamp equals the anchor timestamp.
pub fn classify<S: KeyValueStore>(
    current: &Fix,
    source: LocationSource,
    state: &TrackingState<S>,
    options: &TrackingOptions,
    now: DateTime<Utc>,
) -> Option<Classification> {
    let forced = source.is_forced();

    if options.stop_distance == 0 || options.stop_duration == 0 {
        // Degenerate mode: no distance tracking, stop on explicit signals only.
        let stopped = forced || source == LocationSource::VisitArrival;
        return Some(Classification {
            stopped,
            distance: f64::MAX,
            duration: 0.0,
        });
    }

    let last_moved_location = state.last_moved_location().unwrap_or(*current);
    let last_moved_at = state.last_moved_at().unwrap_or(current.timestamp);

    if !forced && last_moved_at > current.timestamp {
        debug!(
            "[Classifier] Skipping location: old | lastMovedAt = {}; timestamp = {}",
            last_moved_at, current.timestamp
        );
        return None;
    }

    // Seed the anchor once the fix is known not to be stale.
    if state.last_moved_location().is_none() {
        state.set_last_moved_location(current);
    }
    if state.last_moved_at().is_none() {
        state.set_last_moved_at(current.timestamp);
    }

    let distance = current.coordinate.distance_to(&last_moved_location.coordinate);
    let mut duration = (current.timestamp - last_moved_at).num_milliseconds() as f64 / 1000.0;
    if duration == 0.0 {
        duration = (now - current.timestamp).num_milliseconds() as f64 / 1000.0;
    }

    let stopped =
        distance <= options.stop_distance as f64 && duration >= options.stop_duration as f64;
    debug!(
        "[Classifier] Calculating stopped | stopped = {}; distance = {:.1}; duration = {:.1}",
        stopped, distance, duration
    );

    if distance > options.stop_distance as f64 {
        state.set_last_moved_location(current);
        if !stopped {
            state.set_last_moved_at(current.timestamp);
        }
    }

    Some(Classification {
        stopped,
        distance,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;
    use crate::Coordinate;
    use chrono::{Duration, TimeZone};

    fn options(stop_distance: u32, stop_duration: u32) -> TrackingOptions {
        TrackingOptions {
            stop_distance,
            stop_duration,
            ..TrackingOptions::responsive()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn fix(coordinate: Coordinate, at: DateTime<Utc>) -> Fix {
        Fix::new(coordinate, 10.0, at)
    }

    #[test]
    fn test_stop_transition_scenario() {
        let state = TrackingState::new(MemoryStore::new());
        let options = options(50, 120);
        let coord = Coordinate::new(40.0, -73.0);

        // Fix A at t=0 seeds the anchor.
        let a = fix(coord, t0());
        let result = classify(&a, LocationSource::BackgroundUpdate, &state, &options, t0()).unwrap();
        assert!(!result.stopped);
        assert_eq!(state.last_moved_location(), Some(a));
        assert_eq!(state.last_moved_at(), Some(t0()));

        // Fix B at t=60, same coordinates: within distance, short duration.
        let b = fix(coord, t0() + Duration::seconds(60));
        let result =
            classify(&b, LocationSource::BackgroundUpdate, &state, &options, b.timestamp).unwrap();
        assert!(!result.stopped);
        assert!(result.distance <= 50.0);
        assert_eq!(result.duration, 60.0);

        // Fix C at t=130: duration crosses the threshold.
        let c = fix(coord, t0() + Duration::seconds(130));
        let result =
            classify(&c, LocationSource::BackgroundUpdate, &state, &options, c.timestamp).unwrap();
        assert!(result.stopped);
        assert_eq!(result.duration, 130.0);
    }

    #[test]
    fn test_stale_fix_rejected_without_mutation() {
        let state = TrackingState::new(MemoryStore::new());
        let options = options(50, 120);
        let coord = Coordinate::new(40.0, -73.0);

        let current = fix(coord, t0() + Duration::seconds(100));
        classify(&current, LocationSource::BackgroundUpdate, &state, &options, current.timestamp)
            .unwrap();
        let anchor = state.last_moved_location();
        let anchor_at = state.last_moved_at();

        // Strictly older than the anchor, not forced: rejected entirely.
        let stale = fix(Coordinate::new(41.0, -73.0), t0());
        let result =
            classify(&stale, LocationSource::BackgroundUpdate, &state, &options, stale.timestamp);
        assert!(result.is_none());
        assert_eq!(state.last_moved_location(), anchor);
        assert_eq!(state.last_moved_at(), anchor_at);
    }

    #[test]
    fn test_forced_fix_bypasses_staleness() {
        let state = TrackingState::new(MemoryStore::new());
        let options = options(50, 120);
        let coord = Coordinate::new(40.0, -73.0);

        let current = fix(coord, t0() + Duration::seconds(100));
        classify(&current, LocationSource::BackgroundUpdate, &state, &options, current.timestamp)
            .unwrap();

        // Backdated but forced: classified, with a negative duration.
        let backdated = fix(coord, t0());
        let result =
            classify(&backdated, LocationSource::Manual, &state, &options, backdated.timestamp)
                .unwrap();
        assert_eq!(result.duration, -100.0);
        assert!(!result.stopped);
    }

    #[test]
    fn test_degenerate_thresholds() {
        let state = TrackingState::new(MemoryStore::new());
        let options = options(0, 0);
        let coord = Coordinate::new(40.0, -73.0);
        let current = fix(coord, t0());

        let result =
            classify(&current, LocationSource::BackgroundUpdate, &state, &options, t0()).unwrap();
        assert!(!result.stopped);

        let result =
            classify(&current, LocationSource::VisitArrival, &state, &options, t0()).unwrap();
        assert!(result.stopped);

        let result = classify(&current, LocationSource::Manual, &state, &options, t0()).unwrap();
        assert!(result.stopped);

        // No anchor tracking in degenerate mode.
        assert!(state.last_moved_location().is_none());
    }

    #[test]
    fn test_anchor_resets_when_displaced() {
        let state = TrackingState::new(MemoryStore::new());
        let options = options(50, 120);

        let origin = fix(Coordinate::new(40.0, -73.0), t0());
        classify(&origin, LocationSource::BackgroundUpdate, &state, &options, t0()).unwrap();

        // ~1.1 km north: well past the stop distance.
        let moved = fix(Coordinate::new(40.01, -73.0), t0() + Duration::seconds(200));
        let result =
            classify(&moved, LocationSource::BackgroundUpdate, &state, &options, moved.timestamp)
                .unwrap();
        assert!(!result.stopped);
        assert!(result.distance > 50.0);
        // Moving resets both halves of the anchor.
        assert_eq!(state.last_moved_location(), Some(moved));
        assert_eq!(state.last_moved_at(), Some(moved.timestamp));
    }

    #[test]
    fn test_duration_falls_back_to_wall_clock() {
        let state = TrackingState::new(MemoryStore::new());
        let options = options(50, 120);
        let coord = Coordinate::new(40.0, -73.0);

        // Anchor timestamp equals the fix timestamp, so elapsed-since-anchor
        // is zero and the wall clock decides.
        let current = fix(coord, t0());
        let now = t0() + Duration::seconds(150);
        let result =
            classify(&current, LocationSource::BackgroundUpdate, &state, &options, now).unwrap();
        assert_eq!(result.duration, 150.0);
        assert!(result.stopped);
    }
}
