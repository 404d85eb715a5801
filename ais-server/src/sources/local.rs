//! Local fleet registry source.
//!
//! Reads a Signal K style `vessels` document: an object keyed by vessel
//! identity (`urn:mrn:imo:mmsi:<n>`), with `{value, timestamp}` leaves for
//! navigation data and nested `design` / `sensors.ais` blocks.

use serde_json::Value;
use tracing::debug;

use ais_core::types::{parse_mmsi, Position, Stamped, VesselSnapshot};

use super::{as_f64, as_text, fetch_json, parse_timestamp, FetchContext, SourceError, VesselSource};

pub struct LocalRegistry {
    client: reqwest::Client,
    url: String,
}

impl LocalRegistry {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        LocalRegistry {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl VesselSource for LocalRegistry {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<Vec<VesselSnapshot>, SourceError> {
        let doc = fetch_json(self.client.get(&self.url)).await?;
        normalize_registry(&doc)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Convert a whole registry document. Entries without an MMSI are skipped.
pub fn normalize_registry(doc: &Value) -> Result<Vec<VesselSnapshot>, SourceError> {
    let Some(entries) = doc.as_object() else {
        return Err(SourceError::Malformed("registry is not a JSON object".into()));
    };

    let mut vessels = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        match normalize_vessel(key, entry) {
            Some(v) => vessels.push(v),
            None => debug!(key = %key, "registry entry without MMSI skipped"),
        }
    }
    Ok(vessels)
}

/// Leaf that is either a bare value or a `{value, timestamp}` object.
fn leaf(node: &Value) -> (&Value, Option<chrono::DateTime<chrono::Utc>>) {
    match node.get("value") {
        Some(value) => (value, parse_timestamp(&node["timestamp"])),
        None => (node, None),
    }
}

fn stamped_number(node: &Value) -> Option<Stamped<f64>> {
    let (value, ts) = leaf(node);
    as_f64(value).map(|v| Stamped::new(v, ts))
}

fn stamped_text(node: &Value) -> Option<Stamped<String>> {
    let (value, ts) = leaf(node);
    as_text(value).map(|v| Stamped::new(v, ts))
}

fn stamped_position(node: &Value) -> Option<Stamped<Position>> {
    let (value, ts) = leaf(node);
    let lat = as_f64(&value["latitude"])?;
    let lon = as_f64(&value["longitude"])?;
    Some(Stamped::new(Position::new(lat, lon), ts))
}

fn parse_imo(value: &Value) -> Option<u32> {
    let text = as_text(value)?;
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok().filter(|&n| n > 0)
}

pub fn normalize_vessel(key: &str, entry: &Value) -> Option<VesselSnapshot> {
    if !entry.is_object() {
        return None;
    }
    let mmsi = as_text(&entry["mmsi"])
        .and_then(|m| parse_mmsi(&m))
        .or_else(|| parse_mmsi(key))?;

    let mut vessel = VesselSnapshot::new(mmsi);
    vessel.name = as_text(&entry["name"]);
    vessel.callsign = as_text(&entry["communication"]["callsignVhf"])
        .or_else(|| as_text(&entry["callSign"]))
        .or_else(|| as_text(&entry["callsign"]))
        .or_else(|| as_text(&entry["vessel"]["callSign"]));
    vessel.imo = parse_imo(&entry["registrations"]["imo"]).or_else(|| parse_imo(&entry["imo"]));

    let nav = &entry["navigation"];
    let n = &mut vessel.navigation;
    n.position = stamped_position(&nav["position"]);
    n.position_source = as_text(&nav["position"]["$source"]);
    n.speed_over_ground = stamped_number(&nav["speedOverGround"]);
    n.course_over_ground_true = stamped_number(&nav["courseOverGroundTrue"]);
    n.heading_true = stamped_number(&nav["headingTrue"]);
    n.rate_of_turn = stamped_number(&nav["rateOfTurn"]);
    n.state = stamped_text(&nav["state"]);
    n.destination = stamped_text(&nav["destination"]["commonName"]);
    n.eta = stamped_text(&nav["courseGreatCircle"]["activeRoute"]["estimatedTimeOfArrival"])
        .or_else(|| stamped_text(&nav["destination"]["eta"]));

    let design = &entry["design"];
    let d = &mut vessel.design;
    d.length_overall = as_f64(&design["length"]["value"]["overall"]);
    d.beam = as_f64(&design["beam"]["value"]);
    d.max_draft = as_f64(&design["draft"]["value"]["maximum"]);
    d.ship_type = as_f64(&design["aisShipType"]["value"]["id"])
        .filter(|t| (0.0..=255.0).contains(t))
        .map(|t| t as u8);

    let ais = &entry["sensors"]["ais"];
    vessel.sensor.from_bow = as_f64(&ais["fromBow"]["value"]);
    vessel.sensor.from_center = as_f64(&ais["fromCenter"]["value"]);

    Some(vessel)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Value {
        json!({
            "urn:mrn:imo:mmsi:244123456": {
                "mmsi": "244123456",
                "name": "Zeemeeuw",
                "communication": { "callsignVhf": "PD1234" },
                "registrations": { "imo": "IMO 9074729" },
                "navigation": {
                    "position": {
                        "value": { "latitude": 52.37, "longitude": 4.89 },
                        "timestamp": "2025-06-01T11:59:30.000Z",
                        "$source": "nmea0183.GP"
                    },
                    "speedOverGround": { "value": 2.57, "timestamp": "2025-06-01T11:59:30.000Z" },
                    "courseOverGroundTrue": { "value": 1.5708, "timestamp": "2025-06-01T11:59:30.000Z" },
                    "headingTrue": { "value": 1.55 },
                    "state": { "value": "motoring" },
                    "destination": { "commonName": { "value": "Rotterdam" } },
                    "courseGreatCircle": {
                        "activeRoute": { "estimatedTimeOfArrival": { "value": "06-15T14:30Z" } }
                    }
                },
                "design": {
                    "length": { "value": { "overall": 12.5 } },
                    "beam": { "value": 4.1 },
                    "draft": { "value": { "maximum": 1.8 } },
                    "aisShipType": { "value": { "id": 37, "name": "Pleasure" } }
                },
                "sensors": { "ais": { "fromBow": { "value": 3.0 }, "fromCenter": { "value": 0.4 } } }
            },
            "urn:mrn:imo:mmsi:211000001": {
                "callSign": "DA1234",
                "navigation": { "position": { "latitude": 54.1, "longitude": 8.2 } }
            },
            "urn:mrn:signalk:uuid:c0d79334-4e25-4245-8892-54e8ccc8021d": {
                "name": "No MMSI"
            },
            "self": "vessels.urn:mrn:imo:mmsi:244123456"
        })
    }

    #[test]
    fn test_normalize_full_entry() {
        let vessels = normalize_registry(&registry()).unwrap();
        assert_eq!(vessels.len(), 2);
        let v = vessels.iter().find(|v| v.mmsi == 244123456).unwrap();

        assert_eq!(v.name.as_deref(), Some("Zeemeeuw"));
        assert_eq!(v.callsign.as_deref(), Some("PD1234"));
        assert_eq!(v.imo, Some(9074729));
        assert_eq!(v.position(), Some(Position::new(52.37, 4.89)));
        assert!(v.position_time().is_some());
        assert_eq!(v.navigation.position_source.as_deref(), Some("nmea0183.GP"));
        assert_eq!(v.sog(), 2.57);
        assert!(v.navigation.speed_over_ground.as_ref().unwrap().timestamp.is_some());
        assert!(v.navigation.heading_true.as_ref().unwrap().timestamp.is_none());
        assert_eq!(v.navigation.state.as_ref().unwrap().value, "motoring");
        assert_eq!(v.navigation.destination.as_ref().unwrap().value, "Rotterdam");
        assert_eq!(v.navigation.eta.as_ref().unwrap().value, "06-15T14:30Z");
        assert_eq!(v.design.length_overall, Some(12.5));
        assert_eq!(v.design.beam, Some(4.1));
        assert_eq!(v.design.max_draft, Some(1.8));
        assert_eq!(v.design.ship_type, Some(37));
        assert_eq!(v.sensor.from_bow, Some(3.0));
        assert_eq!(v.sensor.from_center, Some(0.4));
    }

    #[test]
    fn test_mmsi_from_key_and_flat_position() {
        let vessels = normalize_registry(&registry()).unwrap();
        let v = vessels.iter().find(|v| v.mmsi == 211000001).unwrap();
        assert_eq!(v.callsign.as_deref(), Some("DA1234"));
        assert_eq!(v.position(), Some(Position::new(54.1, 8.2)));
        assert!(v.position_time().is_none());
        assert!(v.name.is_none());
    }

    #[test]
    fn test_non_object_document_is_malformed() {
        let err = normalize_registry(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn test_non_numeric_course_ignored() {
        let entry = json!({
            "mmsi": 244000001,
            "navigation": { "courseOverGroundTrue": { "value": { "bogus": true } } }
        });
        let v = normalize_vessel("x", &entry).unwrap();
        assert_eq!(v.mmsi, 244000001);
        assert!(v.navigation.course_over_ground_true.is_none());
    }
}
