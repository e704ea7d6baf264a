//! Domain models consumed by the engine.
//!
//! These are the shapes the core produces and consumes at the transmission
//! boundary: geofences with circle/polygon geometry, beacons, the server's
//! view of the user, and generated events. Bit-exact wire schemas belong to
//! the transport; these structs define the crate's own JSON shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Coordinate;

/// Geofence geometry. Polygons carry their precomputed centroid and
/// enclosing radius so region reconciliation can monitor them as circles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Geometry {
    Circle {
        center: Coordinate,
        radius: f64,
    },
    Polygon {
        vertices: Vec<Coordinate>,
        center: Coordinate,
        radius: f64,
    },
}

impl Geometry {
    /// Monitoring center: the circle center, or the polygon centroid.
    pub fn center(&self) -> Coordinate {
        match self {
            Geometry::Circle { center, .. } => *center,
            Geometry::Polygon { center, .. } => *center,
        }
    }

    /// Monitoring radius in meters.
    pub fn radius(&self) -> f64 {
        match self {
            Geometry::Circle { radius, .. } => *radius,
            Geometry::Polygon { radius, .. } => *radius,
        }
    }
}

/// A server-defined geofence mirrored on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub geometry: Geometry,
}

/// A Bluetooth beacon known to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub uuid: String,
    pub major: String,
    pub minor: String,
    /// The beacon's installed location.
    pub coordinate: Coordinate,
}

/// A place the user may be at.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Learned home/office presence.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsState {
    #[serde(default)]
    pub home: bool,
    #[serde(default)]
    pub office: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    #[serde(default)]
    pub state: Option<InsightsState>,
}

/// An active trip attached to the user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub external_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// The server's view of the user after a track call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub geofences: Option<Vec<Geofence>>,
    #[serde(default)]
    pub place: Option<Place>,
    #[serde(default)]
    pub insights: Option<Insights>,
    #[serde(default)]
    pub trip: Option<Trip>,
}

impl User {
    /// Whether the user is inside an exit-worthy context: a geofence, a
    /// place, or learned home/office. Gates "stops and exits" sync mode.
    pub fn can_exit(&self) -> bool {
        let in_geofences = self.geofences.as_ref().is_some_and(|g| !g.is_empty());
        let at_place = self.place.is_some();
        let state = self.insights.as_ref().and_then(|i| i.state);
        let at_home = state.is_some_and(|s| s.home);
        let at_office = state.is_some_and(|s| s.office);
        in_geofences || at_place || at_home || at_office
    }
}

/// A server-generated event (entered geofence, started trip, ...).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
