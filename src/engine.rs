//! Update orchestrator.
//!
//! The engine is the single entry point for every incoming fix and region
//! event. Per fix it sequences validation, stop/move classification,
//! persistence, region reconciliation, observer notification and the sync
//! decision, then hands qualifying fixes to the transmission client and
//! feeds the response back into state (`can_exit`) and the synced region
//! lists.
//!
//! One async mutex serializes classification, persistence and one-shot
//! callback bookkeeping, so concurrent fix arrivals observe a consistent
//! movement anchor. The lock is released before any network await.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use chrono::Utc;
use log::{debug, info};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use crate::api::{TrackRequest, TransmissionClient};
use crate::classifier::classify;
use crate::error::Status;
use crate::models::{Beacon, Event, User};
use crate::options::{DesiredAccuracy, ReplayOption, TrackingOptions};
use crate::platform::{Authorization, BeaconRanger, LocationProvider};
use crate::regions;
use crate::state::{KeyValueStore, TrackingState};
use crate::sync::{self, SyncDecision, SyncInput};
use crate::{Fix, LocationSource};

/// One-shot location requests give up after this long without a fix.
const LOCATION_TIMEOUT: Duration = Duration::from_secs(20);
/// Beacon ranging is bounded much tighter than location.
const BEACON_RANGING_TIMEOUT: Duration = Duration::from_secs(5);
/// Keep the low-power source alive this long after stopping the timer, so
/// an in-flight send is not cut off.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
/// Fixes at or above this horizontal accuracy are too noisy to classify
/// while stopped, unless low accuracy was asked for.
const POOR_ACCURACY_METERS: f64 = 1000.0;

const NEARBY_BEACON_SEARCH_RADIUS: u32 = 1000;
const NEARBY_BEACON_SEARCH_LIMIT: u32 = 10;

/// Receives engine output. All methods have empty defaults; implement the
/// ones you need and register with [`TrackingEngine::add_observer`].
pub trait TrackingObserver: Send + Sync + 'static {
    /// Every client-side location update, regardless of the sync decision.
    fn on_client_location(&self, _fix: &Fix, _stopped: bool, _source: LocationSource) {}
    /// Every server-confirmed location update with full user state.
    fn on_location(&self, _fix: &Fix, _user: &User) {}
    /// Every non-empty event batch generated by a track call.
    fn on_events(&self, _events: &[Event], _user: &User) {}
    /// Every failure surfaced by the engine or the transmission client.
    fn on_error(&self, _status: Status) {}
    /// Debug log lines, for hosts that forward engine diagnostics.
    fn on_log(&self, _message: &str) {}
}

struct PendingRequest {
    id: u64,
    tx: oneshot::Sender<Result<(Fix, bool), Status>>,
}

#[derive(Default)]
struct EngineInner {
    pending: Vec<PendingRequest>,
    nearby_beacon_ids: BTreeSet<String>,
    started: bool,
    started_interval: u32,
    sending: bool,
    timer: Option<JoinHandle<()>>,
    shutdown: Option<JoinHandle<()>>,
}

/// The tracking state machine.
///
/// Collaborators are injected at construction; the engine owns the
/// persistent tracking state exclusively and is the only component that
/// writes transmission results back into it.
pub struct TrackingEngine<P, T, B, S>
where
    P: LocationProvider,
    T: TransmissionClient,
    B: BeaconRanger,
    S: KeyValueStore,
{
    provider: P,
    transport: T,
    ranger: B,
    state: TrackingState<S>,
    inner: Mutex<EngineInner>,
    observers: StdMutex<Vec<Arc<dyn TrackingObserver>>>,
    next_request_id: AtomicU64,
    weak_self: Weak<Self>,
}

impl<P, T, B, S> TrackingEngine<P, T, B, S>
where
    P: LocationProvider,
    T: TransmissionClient,
    B: BeaconRanger,
    S: KeyValueStore,
{
    pub fn new(provider: P, transport: T, ranger: B, store: S) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            provider,
            transport,
            ranger,
            state: TrackingState::new(store),
            inner: Mutex::new(EngineInner::default()),
            observers: StdMutex::new(Vec::new()),
            next_request_id: AtomicU64::new(1),
            weak_self: weak.clone(),
        })
    }

    /// The persistent tracking state. Read-only access for hosts; the
    /// engine owns all writes.
    pub fn state(&self) -> &TrackingState<S> {
        &self.state
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn add_observer(&self, observer: Arc<dyn TrackingObserver>) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(observer);
        }
    }

    pub fn remove_observer(&self, observer: &Arc<dyn TrackingObserver>) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.retain(|o| !Arc::ptr_eq(o, observer));
        }
    }

    fn each_observer(&self, mut call: impl FnMut(&dyn TrackingObserver)) {
        let observers = match self.observers.lock() {
            Ok(observers) => observers.clone(),
            Err(_) => return,
        };
        for observer in &observers {
            call(observer.as_ref());
        }
    }

    fn log_debug(&self, message: &str) {
        debug!("[TrackingEngine] {}", message);
        self.each_observer(|o| o.on_log(message));
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Enable tracking with the given options.
    pub async fn start_tracking(&self, options: TrackingOptions) -> Result<(), Status> {
        if !self.provider.authorization().is_granted() {
            self.each_observer(|o| o.on_error(Status::PermissionDenied));
            return Err(Status::PermissionDenied);
        }
        self.state.set_tracking(true);
        self.state.set_tracking_options(&options);
        self.update_tracking().await;
        Ok(())
    }

    /// Disable tracking, tearing down timers, regions and auxiliary
    /// signal sources.
    pub async fn stop_tracking(&self) {
        self.state.set_tracking(false);
        self.update_tracking().await;
    }

    /// Re-evaluate the tracking flag (activation window included) and
    /// reconcile timers, signal sources and regions with the current
    /// configuration. Hosts call this on app foreground.
    pub async fn update_tracking(&self) {
        let mut inner = self.inner.lock().await;
        self.update_tracking_locked(&mut inner, None);
    }

    /// One-shot location request. Resolves with the next qualifying fix
    /// and its stopped flag, or [`Status::LocationTimeout`] after 20 s.
    pub async fn get_location(&self, accuracy: DesiredAccuracy) -> Result<(Fix, bool), Status> {
        if !self.provider.authorization().is_granted() {
            self.each_observer(|o| o.on_error(Status::PermissionDenied));
            return Err(Status::PermissionDenied);
        }

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            inner.pending.push(PendingRequest { id, tx });
        }

        self.provider.set_desired_accuracy(accuracy);
        self.provider.request_location();

        match timeout(LOCATION_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Status::Unknown),
            Err(_) => {
                // Timed out: withdraw the request so a late fix cannot
                // resolve it after the error is returned.
                let mut inner = self.inner.lock().await;
                inner.pending.retain(|p| p.id != id);
                self.log_debug("Location timeout");
                Err(Status::LocationTimeout)
            }
        }
    }

    /// Range the given beacons, bounded to a 5 second window.
    pub async fn range_nearby_beacons(&self, beacons: Vec<Beacon>) -> Result<Vec<String>, Status> {
        match timeout(BEACON_RANGING_TIMEOUT, self.ranger.range_beacons(beacons)).await {
            Ok(result) => result,
            Err(_) => Err(Status::BluetoothUnavailable),
        }
    }

    // ------------------------------------------------------------------
    // Fix handling
    // ------------------------------------------------------------------

    /// Handle a batch of fixes pushed by the provider. The newest fix wins;
    /// it is treated as the answer to a one-shot request when one is
    /// waiting, and as a background update otherwise.
    pub async fn handle_provider_locations(&self, fixes: Vec<Fix>) {
        let Some(fix) = fixes.into_iter().last() else {
            return;
        };
        let source = if self.inner.lock().await.pending.is_empty() {
            LocationSource::BackgroundUpdate
        } else {
            LocationSource::ForegroundRequest
        };
        self.handle_location(fix, source).await;
    }

    /// The per-fix entry point: classify, persist, reconcile regions,
    /// notify, and conditionally transmit.
    pub async fn handle_location(&self, fix: Fix, source: LocationSource) {
        self.log_debug(&format!(
            "Handling location | source = {}; location = {:.5},{:.5}",
            source.as_str(),
            fix.coordinate.latitude,
            fix.coordinate.longitude
        ));

        let mut inner = self.inner.lock().await;

        if !fix.is_valid() {
            self.log_debug(&format!("Invalid location | source = {}", source.as_str()));
            Self::resolve_pending(&mut inner, Err(Status::LocationInvalid));
            return;
        }

        let options = self.state.tracking_options();
        let was_stopped = self.state.stopped();
        let forced = source.is_forced();

        if was_stopped
            && !forced
            && fix.horizontal_accuracy >= POOR_ACCURACY_METERS
            && options.desired_accuracy != DesiredAccuracy::Low
        {
            // Too noisy to trust while stopped; keep regions fresh from the
            // last accepted location instead.
            self.log_debug(&format!(
                "Skipping location: inaccurate | accuracy = {}",
                fix.horizontal_accuracy
            ));
            let anchor = self.state.last_location();
            self.update_tracking_locked(&mut inner, anchor.as_ref());
            return;
        }

        if !forced && !self.state.tracking() {
            self.log_debug("Skipping location: not tracking");
            return;
        }

        let now = Utc::now();
        let Some(classification) = classify(&fix, source, &self.state, &options, now) else {
            // Stale fix: no state mutation, no callback resolution.
            return;
        };

        let stopped = classification.stopped;
        let just_stopped = stopped && !was_stopped;
        self.state.set_stopped(stopped);
        self.state.set_last_location(&fix);

        self.each_observer(|o| o.on_client_location(&fix, stopped, source));

        if source != LocationSource::Manual {
            self.update_tracking_locked(&mut inner, Some(&fix));
        }

        Self::resolve_pending(&mut inner, Ok((fix, stopped)));

        let input = SyncInput {
            current: fix,
            source,
            stopped,
            was_stopped,
            just_stopped,
            distance: classification.distance,
            pending_handler_count: inner.pending.len(),
            now,
        };
        let decision = sync::decide(&input, &self.state, &options);
        drop(inner);

        let (send_fix, send_stopped, replayed) = match decision {
            SyncDecision::Skip => return,
            SyncDecision::Send(send_fix) => (send_fix, stopped, false),
            SyncDecision::SendReplay(send_fix) => (send_fix, true, true),
        };

        self.state.set_last_sent_at(now);
        if source == LocationSource::ForegroundRequest {
            // Foreground one-shots are answered from the classifier, never
            // transmitted.
            return;
        }
        self.send_location(send_fix, send_stopped, source, replayed).await;
    }

    fn resolve_pending(inner: &mut EngineInner, result: Result<(Fix, bool), Status>) {
        if inner.pending.is_empty() {
            return;
        }
        debug!(
            "[TrackingEngine] Calling completion handlers | count = {}",
            inner.pending.len()
        );
        for request in inner.pending.drain(..) {
            let _ = request.tx.send(result);
        }
    }

    // ------------------------------------------------------------------
    // Region and visit events
    // ------------------------------------------------------------------

    /// Best coordinate for a synthetic event fix: the live device location
    /// if valid, else the last accepted one.
    fn event_fix(&self, live: Option<Fix>) -> Option<Fix> {
        live.filter(Fix::is_valid).or_else(|| self.state.last_location())
    }

    /// The device entered a monitored region.
    pub async fn handle_region_enter(&self, identifier: &str, live: Option<Fix>) {
        match regions::RegionKind::of(identifier) {
            None => {}
            Some(regions::RegionKind::SyncedBeacon) => {
                let Some(beacon_id) = regions::beacon_id_of(identifier) else {
                    return;
                };
                let inserted = {
                    let mut inner = self.inner.lock().await;
                    inner.nearby_beacon_ids.insert(beacon_id.to_string())
                };
                if !inserted {
                    self.log_debug(&format!("Already inside beacon region | identifier = {}", beacon_id));
                    return;
                }
                self.log_debug(&format!("Entered beacon region | identifier = {}", beacon_id));
                match self.event_fix(live) {
                    Some(fix) => self.handle_location(fix, LocationSource::BeaconEnter).await,
                    None => self.fail_pending(Status::LocationInvalid).await,
                }
            }
            Some(_) => {
                if let Some(fix) = live {
                    self.handle_location(fix, LocationSource::GeofenceEnter).await;
                }
            }
        }
    }

    /// The device exited a monitored region.
    pub async fn handle_region_exit(&self, identifier: &str, live: Option<Fix>) {
        match regions::RegionKind::of(identifier) {
            None => {}
            Some(regions::RegionKind::SyncedBeacon) => {
                let Some(beacon_id) = regions::beacon_id_of(identifier) else {
                    return;
                };
                let removed = {
                    let mut inner = self.inner.lock().await;
                    inner.nearby_beacon_ids.remove(beacon_id)
                };
                if !removed {
                    self.log_debug(&format!("Already outside beacon region | identifier = {}", beacon_id));
                    return;
                }
                self.log_debug(&format!("Exited beacon region | identifier = {}", beacon_id));
                match self.event_fix(live) {
                    Some(fix) => self.handle_location(fix, LocationSource::BeaconExit).await,
                    None => self.fail_pending(Status::LocationInvalid).await,
                }
            }
            Some(_) => {
                if let Some(fix) = live {
                    self.handle_location(fix, LocationSource::GeofenceExit).await;
                }
            }
        }
    }

    /// Initial containment answer for a synced beacon region, from
    /// [`LocationProvider::request_region_state`].
    pub async fn handle_region_state(&self, identifier: &str, inside: bool) {
        if regions::RegionKind::of(identifier) != Some(regions::RegionKind::SyncedBeacon) {
            return;
        }
        let Some(beacon_id) = regions::beacon_id_of(identifier) else {
            return;
        };
        let mut inner = self.inner.lock().await;
        if inside {
            self.log_debug(&format!("Inside beacon region | identifier = {}", beacon_id));
            inner.nearby_beacon_ids.insert(beacon_id.to_string());
        } else {
            self.log_debug(&format!("Outside beacon region | identifier = {}", beacon_id));
            inner.nearby_beacon_ids.remove(beacon_id);
        }
    }

    /// A visit event from the platform visit monitoring service.
    pub async fn handle_visit(&self, arrival: bool, live: Option<Fix>) {
        let Some(fix) = live else {
            return;
        };
        let source = if arrival {
            LocationSource::VisitArrival
        } else {
            LocationSource::VisitDeparture
        };
        self.handle_location(fix, source).await;
    }

    /// The provider failed to produce a location at all.
    pub async fn handle_provider_error(&self) {
        self.each_observer(|o| o.on_error(Status::LocationInvalid));
        self.fail_pending(Status::LocationInvalid).await;
    }

    async fn fail_pending(&self, status: Status) {
        let mut inner = self.inner.lock().await;
        Self::resolve_pending(&mut inner, Err(status));
    }

    // ------------------------------------------------------------------
    // Tracking state machine
    // ------------------------------------------------------------------

    fn update_tracking_locked(&self, inner: &mut EngineInner, location: Option<&Fix>) {
        let mut tracking = self.state.tracking();
        let options = self.state.tracking_options();
        let now = Utc::now();

        if !tracking {
            if let Some(start_after) = options.start_tracking_after {
                if start_after <= now {
                    info!("[TrackingEngine] Starting time-based tracking | startTrackingAfter = {}", start_after);
                    self.state.set_tracking(true);
                    tracking = true;
                }
            }
        } else if let Some(stop_after) = options.stop_tracking_after {
            if stop_after <= now {
                info!("[TrackingEngine] Stopping time-based tracking | stopTrackingAfter = {}", stop_after);
                self.state.set_tracking(false);
                tracking = false;
            }
        }

        if tracking {
            self.provider.set_desired_accuracy(options.desired_accuracy);
            self.provider.set_indicator_visible(options.show_indicator);

            let can_run_updates = options.show_indicator
                || self.provider.authorization() == Authorization::GrantedBackground;
            let stopped = self.state.stopped();
            let (interval, use_bubble, bubble_radius) = if stopped {
                (
                    options.desired_stopped_update_interval,
                    options.use_stopped_geofence,
                    options.stopped_geofence_radius,
                )
            } else {
                (
                    options.desired_moving_update_interval,
                    options.use_moving_geofence,
                    options.moving_geofence_radius,
                )
            };

            if interval == 0 {
                self.stop_updates_locked(inner);
            } else if can_run_updates {
                self.start_updates_locked(inner, interval);
            }

            match (use_bubble, location) {
                (true, Some(fix)) => {
                    regions::replace_bubble(&self.provider, true, fix.coordinate, bubble_radius)
                }
                _ => regions::remove_bubble(&self.provider),
            }

            if !options.sync_geofences {
                regions::remove_synced_geofences(&self.provider);
            }
            if options.use_visits {
                self.provider.start_monitoring_visits();
            }
            if options.use_significant_location_changes {
                self.provider.start_monitoring_significant_changes();
            }
            if !options.use_beacons {
                regions::remove_synced_beacons(&self.provider);
            }
        } else {
            self.stop_updates_locked(inner);
            regions::remove_all(&self.provider);
            self.provider.stop_monitoring_visits();
            self.provider.stop_monitoring_significant_changes();
        }
    }

    fn start_updates_locked(&self, inner: &mut EngineInner, interval: u32) {
        if inner.started && interval == inner.started_interval {
            debug!("[TrackingEngine] Already started timer");
            return;
        }
        debug!("[TrackingEngine] Starting timer | interval = {}", interval);
        if let Some(shutdown) = inner.shutdown.take() {
            shutdown.abort();
        }
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        let weak = self.weak_self.clone();
        let period = Duration::from_secs(interval as u64);
        inner.timer = Some(tokio::spawn(async move {
            loop {
                sleep(period).await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                debug!("[TrackingEngine] Timer fired");
                engine.provider.request_location();
            }
        }));
        self.provider.start_continuous_updates();
        inner.started = true;
        inner.started_interval = interval;
    }

    fn stop_updates_locked(&self, inner: &mut EngineInner) {
        let Some(timer) = inner.timer.take() else {
            return;
        };
        debug!("[TrackingEngine] Stopping timer");
        timer.abort();
        inner.started = false;
        inner.started_interval = 0;

        if !inner.sending {
            let delay = if self.state.tracking() {
                SHUTDOWN_GRACE
            } else {
                Duration::ZERO
            };
            debug!("[TrackingEngine] Scheduling shutdown");
            if let Some(shutdown) = inner.shutdown.take() {
                shutdown.abort();
            }
            let weak = self.weak_self.clone();
            inner.shutdown = Some(tokio::spawn(async move {
                sleep(delay).await;
                if let Some(engine) = weak.upgrade() {
                    debug!("[TrackingEngine] Shutting down");
                    engine.provider.stop_continuous_updates();
                }
            }));
        }
    }

    // ------------------------------------------------------------------
    // Transmission
    // ------------------------------------------------------------------

    async fn send_location(&self, fix: Fix, stopped: bool, source: LocationSource, replayed: bool) {
        self.log_debug(&format!(
            "Sending location | source = {}; stopped = {}; replayed = {}",
            source.as_str(),
            stopped,
            replayed
        ));

        let options = self.state.tracking_options();
        let mut nearby_beacons = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            inner.sending = true;
            if options.use_beacons {
                nearby_beacons = inner.nearby_beacon_ids.iter().cloned().collect();
            }
        }

        if options.use_beacons
            && !matches!(
                source,
                LocationSource::BeaconEnter
                    | LocationSource::BeaconExit
                    | LocationSource::Mock
                    | LocationSource::Manual
            )
        {
            match self
                .transport
                .search_beacons(fix.coordinate, NEARBY_BEACON_SEARCH_RADIUS, NEARBY_BEACON_SEARCH_LIMIT)
                .await
            {
                Ok(beacons) => regions::replace_synced_beacons(
                    &self.provider,
                    self.state.tracking(),
                    options.use_beacons,
                    &beacons,
                ),
                Err(status) => {
                    debug!("[TrackingEngine] Beacon search failed | status = {}", status)
                }
            }
        }

        let request = TrackRequest {
            fix,
            stopped,
            foreground: source == LocationSource::ForegroundRequest,
            source,
            replayed,
            nearby_beacons,
            include_nearby_geofences: options.sync_geofences,
            trip_options: self.state.trip_options(),
        };

        match self.transport.track(request).await {
            Ok(response) => {
                self.state.set_last_failed_stopped_location(None);
                if let Some(user) = &response.user {
                    self.state.set_can_exit(user.can_exit());
                    if user.trip.is_none() {
                        self.state.set_trip_options(None);
                    }
                    self.each_observer(|o| o.on_location(&fix, user));
                    if !response.events.is_empty() {
                        self.each_observer(|o| o.on_events(&response.events, user));
                    }
                }

                let mut inner = self.inner.lock().await;
                inner.sending = false;
                self.update_tracking_locked(&mut inner, None);
                drop(inner);

                if let Some(geofences) = &response.nearby_geofences {
                    regions::replace_synced_geofences(
                        &self.provider,
                        self.state.tracking(),
                        options.sync_geofences,
                        geofences,
                    );
                }
            }
            Err(status) => {
                if options.replay == ReplayOption::Stops
                    && stopped
                    && !matches!(source, LocationSource::ForegroundRequest | LocationSource::Manual)
                {
                    self.state.set_last_failed_stopped_location(Some(&fix));
                }
                let mut inner = self.inner.lock().await;
                inner.sending = false;
                self.update_tracking_locked(&mut inner, None);
                drop(inner);
                self.each_observer(|o| o.on_error(status));
            }
        }
    }
}
