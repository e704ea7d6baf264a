//! Sync throttle and replay policy.
//!
//! Given an already-classified fix, decides whether to transmit it now,
//! skip it, or substitute a previously failed stopped fix (replay). The
//! throttle rules are evaluated in order, first match wins; they are all
//! bypassed when the update is intrinsically sync-worthy (first ever send,
//! pending one-shot waiters, a fresh stop, a replay, or a beacon
//! transition).

use chrono::{DateTime, Utc};
use log::debug;

use crate::options::{ReplayOption, SyncMode, TrackingOptions};
use crate::state::{KeyValueStore, TrackingState};
use crate::{Fix, LocationSource};

/// What to do with a classified fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncDecision {
    /// Transmit the classified fix.
    Send(Fix),
    /// Transmit a previously failed stopped fix instead of the current one.
    /// Implies `stopped = true` and `replayed = true` on the wire.
    SendReplay(Fix),
    /// Do not transmit.
    Skip,
}

/// Classified-fix context feeding the throttle.
#[derive(Debug, Clone, Copy)]
pub struct SyncInput {
    pub current: Fix,
    pub source: LocationSource,
    pub stopped: bool,
    pub was_stopped: bool,
    pub just_stopped: bool,
    /// Displacement from the movement anchor, from the classifier.
    pub distance: f64,
    /// One-shot completion waiters registered at decision time.
    pub pending_handler_count: usize,
    pub now: DateTime<Utc>,
}

/// Apply replay substitution and the throttle rules.
///
/// Consumes the stored failed stopped location when substituting: replay is
/// exactly-once, so the pending value is cleared here even though the
/// transmission may fail again (failure re-persists it).
///
/// Foreground-sourced fixes are never transmitted, so they never consume
/// the pending replay; it stays stored for the next real sync attempt.
pub fn decide<S: KeyValueStore>(
    input: &SyncInput,
    state: &TrackingState<S>,
    options: &TrackingOptions,
) -> SyncDecision {
    let forced = input.source.is_forced();

    let mut send_fix = input.current;
    let mut replayed = false;
    if options.replay == ReplayOption::Stops
        && input.source != LocationSource::ForegroundRequest
        && !input.just_stopped
    {
        if let Some(failed) = state.last_failed_stopped_location() {
            send_fix = failed;
            replayed = true;
            state.set_last_failed_stopped_location(None);
            debug!("[SyncThrottle] Replaying location | location = {:?}", send_fix.coordinate);
        }
    }

    let last_sent_at = state.last_sent_at();
    let ignore_sync = last_sent_at.is_none()
        || input.pending_handler_count != 0
        || input.just_stopped
        || replayed
        || matches!(input.source, LocationSource::BeaconEnter | LocationSource::BeaconExit);

    if !ignore_sync {
        let last_sync_interval = last_sent_at
            .map(|at| (input.now - at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        if !forced
            && input.stopped
            && input.was_stopped
            && input.distance <= options.stop_distance as f64
            && (options.desired_stopped_update_interval == 0
                || options.sync_locations != SyncMode::All)
        {
            debug!("[SyncThrottle] Skipping sync: already stopped");
            return SyncDecision::Skip;
        }
        if last_sync_interval < options.desired_sync_interval as f64 {
            debug!(
                "[SyncThrottle] Skipping sync: desired sync interval | desiredSyncInterval = {}; lastSyncInterval = {:.1}",
                options.desired_sync_interval, last_sync_interval
            );
            return SyncDecision::Skip;
        }
        if !forced && !input.just_stopped && last_sync_interval < 1.0 {
            debug!("[SyncThrottle] Skipping sync: rate limit | lastSyncInterval = {:.3}", last_sync_interval);
            return SyncDecision::Skip;
        }
        if options.sync_locations == SyncMode::None {
            debug!("[SyncThrottle] Skipping sync: sync mode none");
            return SyncDecision::Skip;
        }
        if options.sync_locations == SyncMode::StopsAndExits && !state.can_exit() {
            debug!("[SyncThrottle] Skipping sync: can't exit");
            return SyncDecision::Skip;
        }
    }

    if replayed {
        SyncDecision::SendReplay(send_fix)
    } else {
        SyncDecision::Send(send_fix)
    }
}
