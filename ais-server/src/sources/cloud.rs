//! Cloud "nearby vessels" source.
//!
//! Queried around own position with a radius in nautical miles. The service
//! answers with a flat per-vessel schema in nautical units (knots, degrees,
//! degrees per minute), converted to SI here. Course and heading of 360
//! mean "not available" and collapse to 0.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use ais_core::filter::within_radius;
use ais_core::types::{parse_mmsi, NavStatus, Position, Stamped, VesselSnapshot};

use super::{as_text, fetch_json, parse_timestamp, FetchContext, SourceError, VesselSource};

const KNOTS_PER_MS: f64 = 1.94384;

pub struct CloudFleet {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    radius_nm: f64,
}

impl CloudFleet {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: Option<String>,
        radius_nm: f64,
    ) -> Self {
        CloudFleet {
            client,
            url: url.into(),
            api_key,
            radius_nm,
        }
    }
}

#[async_trait::async_trait]
impl VesselSource for CloudFleet {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<VesselSnapshot>, SourceError> {
        let (Some(own_mmsi), Some(center)) = (ctx.own_mmsi, ctx.own_position) else {
            debug!("cloud fetch needs own MMSI and position");
            return Ok(Vec::new());
        };

        let mut request = self.client.get(&self.url).query(&[
            ("lat", center.latitude.to_string()),
            ("lon", center.longitude.to_string()),
            ("radius", self.radius_nm.to_string()),
            ("mmsi", own_mmsi.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let doc = fetch_json(request).await?;
        normalize_nearby(&doc, center, self.radius_nm)
    }
}

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

/// One vessel as the cloud service reports it.
#[derive(Debug, Deserialize)]
pub struct CloudVessel {
    pub mmsi: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "callSign", alias = "call_sign")]
    pub callsign: Option<String>,
    #[serde(default)]
    pub imo: Option<Value>,
    #[serde(default, alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lon", alias = "lng")]
    pub longitude: Option<f64>,
    /// knots
    #[serde(default, alias = "speed")]
    pub sog: Option<f64>,
    /// degrees
    #[serde(default, alias = "course")]
    pub cog: Option<f64>,
    /// degrees
    #[serde(default)]
    pub heading: Option<f64>,
    /// degrees per minute
    #[serde(default, alias = "rate_of_turn")]
    pub rot: Option<f64>,
    #[serde(default, alias = "navStatus", alias = "navigation_status")]
    pub nav_status: Option<Value>,
    #[serde(default, alias = "timestamp", alias = "last_position_update")]
    pub last_update: Option<Value>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default, alias = "width")]
    pub beam: Option<f64>,
    #[serde(default)]
    pub draft: Option<f64>,
    #[serde(default, alias = "shipType")]
    pub ship_type: Option<u32>,
}

fn angle(degrees: Option<f64>) -> Option<f64> {
    degrees
        .filter(|d| d.is_finite())
        .map(|d| if d >= 360.0 { 0.0 } else { d.to_radians() })
}

fn nav_state(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|code| NavStatus::from_code(code.min(15) as u8).name().to_string()),
        other => as_text(other),
    }
}

impl CloudVessel {
    pub fn into_snapshot(self) -> Option<VesselSnapshot> {
        let mmsi = as_text(&self.mmsi).and_then(|m| parse_mmsi(&m))?;
        let ts: Option<DateTime<Utc>> = self.last_update.as_ref().and_then(parse_timestamp);
        let stamp = |v: f64| Stamped::new(v, ts);

        let mut vessel = VesselSnapshot::new(mmsi);
        vessel.name = self.name.filter(|n| !n.trim().is_empty());
        vessel.callsign = self.callsign.filter(|c| !c.trim().is_empty());
        vessel.imo = self
            .imo
            .as_ref()
            .and_then(as_text)
            .and_then(|i| i.parse().ok())
            .filter(|&i: &u32| i > 0);

        let n = &mut vessel.navigation;
        if let (Some(lat), Some(lon)) = (self.latitude, self.longitude) {
            n.position = Some(Stamped::new(Position::new(lat, lon), ts));
        }
        n.speed_over_ground = self
            .sog
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| stamp(s / KNOTS_PER_MS));
        n.course_over_ground_true = angle(self.cog).map(stamp);
        n.heading_true = angle(self.heading).map(stamp);
        n.rate_of_turn = self
            .rot
            .filter(|r| r.is_finite())
            .map(|r| stamp((r / 60.0).to_radians()));
        n.state = self
            .nav_status
            .as_ref()
            .and_then(nav_state)
            .map(|s| Stamped::new(s, ts));
        n.destination = self.destination.map(Stamped::unstamped);
        n.eta = self.eta.map(Stamped::unstamped);

        vessel.design.length_overall = self.length;
        vessel.design.beam = self.beam;
        vessel.design.max_draft = self.draft;
        vessel.design.ship_type = self.ship_type.filter(|&t| t <= 255).map(|t| t as u8);

        Some(vessel)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Convert a nearby-vessels response, keeping only vessels inside the radius.
pub fn normalize_nearby(
    doc: &Value,
    center: Position,
    radius_nm: f64,
) -> Result<Vec<VesselSnapshot>, SourceError> {
    let list = match doc {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("vessels").or_else(|| obj.get("data")) {
            Some(Value::Array(items)) => items,
            _ => return Err(SourceError::Malformed("no vessel list in response".into())),
        },
        _ => return Err(SourceError::Malformed("response is not JSON object or array".into())),
    };

    let mut vessels = Vec::with_capacity(list.len());
    for item in list {
        let parsed = match CloudVessel::deserialize(item) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "cloud vessel entry skipped");
                continue;
            }
        };
        let Some(vessel) = parsed.into_snapshot() else {
            continue;
        };
        match vessel.position() {
            Some(pos) if within_radius(center, pos, radius_nm) => vessels.push(vessel),
            _ => {}
        }
    }
    Ok(vessels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
