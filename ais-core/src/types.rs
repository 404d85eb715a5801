//! Shared types, error enum, and the vessel snapshot model for ais-core.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

/// All errors produced by ais-core.
#[derive(Debug, Error)]
pub enum AisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AisError>;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Maritime Mobile Service Identity.
pub type Mmsi = u32;

/// Largest MMSI that fits the 30-bit AIS field.
pub const MMSI_MAX: Mmsi = (1 << 30) - 1;

/// Name some sources report when they have nothing better.
pub const PLACEHOLDER_NAME: &str = "Unknown";

/// Callsign substituted for vessels that have none (exactly 7 characters).
pub const PLACEHOLDER_CALLSIGN: &str = "UNKNOWN";

/// Parse an MMSI from a bare number, a numeric string, or a
/// `urn:mrn:imo:mmsi:<n>` identity. Zero is rejected.
pub fn parse_mmsi(text: &str) -> Option<Mmsi> {
    let text = text.trim();
    let digits = text.strip_prefix("urn:mrn:imo:mmsi:").unwrap_or(text);
    match digits.parse::<Mmsi>() {
        Ok(0) | Err(_) => None,
        Ok(m) => Some(m),
    }
}

/// True if `name` carries real information (not empty, not "Unknown").
pub fn is_usable_name(name: Option<&str>) -> bool {
    match name.map(str::trim) {
        Some(n) => !n.is_empty() && !n.eq_ignore_ascii_case(PLACEHOLDER_NAME),
        None => false,
    }
}

/// True if `callsign` is a real callsign rather than empty or a placeholder.
pub fn is_usable_callsign(callsign: Option<&str>) -> bool {
    match callsign.map(str::trim) {
        Some(c) => {
            !c.is_empty()
                && !c.eq_ignore_ascii_case(PLACEHOLDER_NAME)
                && !c.eq_ignore_ascii_case(PLACEHOLDER_CALLSIGN)
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Navigational status
// ---------------------------------------------------------------------------

/// AIS navigational status (4-bit field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavStatus {
    Motoring,
    Anchored,
    NotUnderCommand,
    RestrictedManeuverability,
    ConstrainedByDraft,
    Moored,
    Aground,
    Fishing,
    Sailing,
    HazardousMaterialHighSpeed,
    HazardousMaterialWingInGround,
    PowerDrivenTowingAstern,
    PowerDrivenPushingAhead,
    Reserved,
    AisSart,
    Undefined,
}

/// State names as reported by the fleet sources, in AIS code order.
pub const NAV_STATE_TABLE: &[(&str, NavStatus)] = &[
    ("motoring", NavStatus::Motoring),
    ("anchored", NavStatus::Anchored),
    ("not under command", NavStatus::NotUnderCommand),
    ("restricted maneuverability", NavStatus::RestrictedManeuverability),
    ("constrained by draft", NavStatus::ConstrainedByDraft),
    ("moored", NavStatus::Moored),
    ("aground", NavStatus::Aground),
    ("fishing", NavStatus::Fishing),
    ("sailing", NavStatus::Sailing),
    ("hazardous material high speed", NavStatus::HazardousMaterialHighSpeed),
    ("hazardous material wing in ground", NavStatus::HazardousMaterialWingInGround),
    ("power-driven vessel towing astern", NavStatus::PowerDrivenTowingAstern),
    ("power-driven vessel pushing ahead", NavStatus::PowerDrivenPushingAhead),
    ("reserved", NavStatus::Reserved),
    ("ais-sart", NavStatus::AisSart),
    ("undefined", NavStatus::Undefined),
];

impl NavStatus {
    /// Look up a state name. Unknown names map to `Undefined`.
    pub fn from_name(name: &str) -> NavStatus {
        let name = name.trim().to_ascii_lowercase();
        NAV_STATE_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, s)| *s)
            .unwrap_or(NavStatus::Undefined)
    }

    /// Look up a numeric AIS status code.
    pub fn from_code(code: u8) -> NavStatus {
        NAV_STATE_TABLE
            .get(code as usize)
            .map(|(_, s)| *s)
            .unwrap_or(NavStatus::Undefined)
    }

    /// The 4-bit wire value.
    pub fn code(self) -> u8 {
        NAV_STATE_TABLE
            .iter()
            .position(|(_, s)| *s == self)
            .unwrap_or(15) as u8
    }

    pub fn name(self) -> &'static str {
        NAV_STATE_TABLE[self.code() as usize].0
    }
}

impl std::fmt::Display for NavStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Vessel snapshot
// ---------------------------------------------------------------------------

/// A value paired with the time the source observed it, if it said.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stamped<T> {
    pub value: T,
    pub timestamp: Option<DateTime<Utc>>,
}

impl<T> Stamped<T> {
    pub fn new(value: T, timestamp: Option<DateTime<Utc>>) -> Self {
        Stamped { value, timestamp }
    }

    pub fn at(value: T, timestamp: DateTime<Utc>) -> Self {
        Stamped {
            value,
            timestamp: Some(timestamp),
        }
    }

    pub fn unstamped(value: T) -> Self {
        Stamped {
            value,
            timestamp: None,
        }
    }
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Position {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Navigation block. SI units: m/s for speed, radians for angles,
/// rad/s for rate of turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Navigation {
    pub position: Option<Stamped<Position>>,
    pub speed_over_ground: Option<Stamped<f64>>,
    pub course_over_ground_true: Option<Stamped<f64>>,
    pub heading_true: Option<Stamped<f64>>,
    pub rate_of_turn: Option<Stamped<f64>>,
    pub state: Option<Stamped<String>>,
    pub destination: Option<Stamped<String>>,
    /// ETA in `MM-DDThh:mmZ` (or full ISO 8601) form.
    pub eta: Option<Stamped<String>>,
    /// Label of the position fix source, e.g. `nmea0183.GP`.
    pub position_source: Option<String>,
}

/// Hull dimensions in metres.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Design {
    pub length_overall: Option<f64>,
    pub beam: Option<f64>,
    pub max_draft: Option<f64>,
    pub ship_type: Option<u8>,
}

/// AIS antenna position relative to the hull, in metres.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AisSensor {
    pub from_bow: Option<f64>,
    pub from_center: Option<f64>,
}

/// One vessel as retrieved from a source in one cycle. After merging, the
/// same type holds the reconciled per-cycle view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselSnapshot {
    pub mmsi: Mmsi,
    pub imo: Option<u32>,
    pub name: Option<String>,
    pub callsign: Option<String>,
    pub navigation: Navigation,
    pub design: Design,
    pub sensor: AisSensor,
}

impl VesselSnapshot {
    pub fn new(mmsi: Mmsi) -> Self {
        VesselSnapshot {
            mmsi,
            imo: None,
            name: None,
            callsign: None,
            navigation: Navigation::default(),
            design: Design::default(),
            sensor: AisSensor::default(),
        }
    }

    pub fn position(&self) -> Option<Position> {
        self.navigation.position.as_ref().map(|p| p.value)
    }

    pub fn position_time(&self) -> Option<DateTime<Utc>> {
        self.navigation.position.as_ref().and_then(|p| p.timestamp)
    }

    /// Age of the position fix, if the source timestamped it.
    pub fn position_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.position_time().map(|ts| now - ts)
    }

    /// Speed over ground in m/s (0 when unknown).
    pub fn sog(&self) -> f64 {
        stamped_or_zero(&self.navigation.speed_over_ground)
    }

    /// Course over ground in radians (0 when unknown).
    pub fn cog(&self) -> f64 {
        stamped_or_zero(&self.navigation.course_over_ground_true)
    }

    /// True heading in radians (0 when unknown).
    pub fn heading(&self) -> f64 {
        stamped_or_zero(&self.navigation.heading_true)
    }

    pub fn nav_status(&self) -> NavStatus {
        self.navigation
            .state
            .as_ref()
            .map(|s| NavStatus::from_name(&s.value))
            .unwrap_or(NavStatus::Undefined)
    }

    pub fn has_usable_name(&self) -> bool {
        is_usable_name(self.name.as_deref())
    }

    pub fn has_usable_callsign(&self) -> bool {
        is_usable_callsign(self.callsign.as_deref())
    }

    /// Short human label for log lines.
    pub fn label(&self) -> String {
        if self.has_usable_name() {
            self.name.as_deref().unwrap_or_default().trim().to_string()
        } else if self.has_usable_callsign() {
            self.callsign.as_deref().unwrap_or_default().trim().to_string()
        } else {
            self.mmsi.to_string()
        }
    }
}

fn stamped_or_zero(field: &Option<Stamped<f64>>) -> f64 {
    field
        .as_ref()
        .map(|s| s.value)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
