//! AIS message encoders: Type 1 position report, Type 5 static and voyage data.
//!
//! Input is a [`VesselSnapshot`] in SI units; each encoder converts to the
//! wire resolution, range-guards every field and packs the exact bit layout.
//!
//! Type 1 (168 bits):
//! ```text
//! type 6 | repeat 2 | mmsi 30 | status 4 | rot 8 | sog 10 | acc 1 | lon 28
//! lat 27 | cog 12 | hdg 9 | sec 6 | maneuver 2 | spare 3 | raim 1 | radio 19
//! ```
//!
//! Type 5 (424 bits):
//! ```text
//! type 6 | repeat 2 | mmsi 30 | version 2 | imo 30 | callsign 42 | name 120
//! ship type 8 | bow 9 | stern 9 | port 6 | starboard 6 | epfd 4
//! eta month 4 | day 5 | hour 5 | minute 6 | draught 8 | destination 120
//! dte 1 | spare 1
//! ```

use crate::sixbit::{callsign_to_six_bit, text_to_six_bit, BitWriter};
use crate::types::{AisSensor, Design, VesselSnapshot, MMSI_MAX};

pub const POSITION_REPORT_BITS: usize = 168;
pub const STATIC_VOYAGE_BITS: usize = 424;

const MS_TO_KNOTS: f64 = 1.94384;
const SOG_MAX_TENTHS: f64 = 1022.0;
const ROT_NOT_AVAILABLE: i64 = -128;
const ROT_MAX: f64 = 126.0;
const TIMESTAMP_NOT_AVAILABLE: u64 = 60;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a vessel produced no sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingMmsi,
    MmsiOutOfRange(u32),
    MissingPosition,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingMmsi => write!(f, "missing MMSI"),
            SkipReason::MmsiOutOfRange(m) => write!(f, "MMSI {m} does not fit 30 bits"),
            SkipReason::MissingPosition => write!(f, "no position available"),
        }
    }
}

/// Tunables that affect encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConfig {
    /// Below this speed (m/s) SOG and COG are reported as 0.
    pub min_alarm_sog: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig { min_alarm_sog: 0.2 }
    }
}

/// Estimated time of arrival as carried by Type 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eta {
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl Eta {
    pub const NOT_AVAILABLE: Eta = Eta {
        month: 0,
        day: 0,
        hour: 24,
        minute: 60,
    };
}

/// Hull extents around the antenna, in whole metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub to_bow: u16,
    pub to_stern: u16,
    pub to_port: u8,
    pub to_starboard: u8,
}

// ---------------------------------------------------------------------------
// Field conversions
// ---------------------------------------------------------------------------

fn check_mmsi(mmsi: u32) -> Result<(), SkipReason> {
    match mmsi {
        0 => Err(SkipReason::MissingMmsi),
        m if m > MMSI_MAX => Err(SkipReason::MmsiOutOfRange(m)),
        _ => Ok(()),
    }
}

/// Rate of turn (rad/s) to the 8-bit AIS ROT indicator.
pub fn rot_field(rate_of_turn: Option<f64>) -> i64 {
    let rot = rate_of_turn.filter(|r| r.is_finite()).unwrap_or(0.0);
    if rot == 0.0 {
        return ROT_NOT_AVAILABLE;
    }
    let deg_per_min = rot.to_degrees() * 60.0;
    let ais = (rot.signum() * 4.733 * deg_per_min.abs().sqrt()).round();
    ais.clamp(-ROT_MAX, ROT_MAX) as i64
}

/// SOG (m/s) to tenths of a knot; 0 below the alarm threshold.
pub fn sog_field(sog: f64, min_alarm_sog: f64) -> u64 {
    if !sog.is_finite() || sog < min_alarm_sog || sog <= 0.0 {
        return 0;
    }
    (sog * MS_TO_KNOTS * 10.0).round().min(SOG_MAX_TENTHS) as u64
}

/// COG (rad) to tenths of a degree in [0, 3600); 0 below the alarm threshold.
pub fn cog_field(cog: f64, sog: f64, min_alarm_sog: f64) -> u64 {
    if !cog.is_finite() || sog < min_alarm_sog {
        return 0;
    }
    ((cog.to_degrees() * 10.0).round() as i64).rem_euclid(3600) as u64
}

/// Heading (rad) to whole degrees in [0, 360).
pub fn heading_field(heading: f64) -> u64 {
    if !heading.is_finite() {
        return 0;
    }
    (heading.to_degrees().round() as i64).rem_euclid(360) as u64
}

fn coordinate_field(value: f64, limit: f64) -> i64 {
    (value.clamp(-limit, limit) * 600_000.0).round() as i64
}

/// Position-fix device type from the position source label.
pub fn epfd_type(source: Option<&str>) -> u8 {
    let source = source.unwrap_or_default().to_ascii_lowercase();
    if source.contains("gps") || source.contains("gnss") {
        1
    } else if source.contains("glonass") {
        2
    } else if source.contains("galileo") {
        3
    } else {
        1
    }
}

fn leading_number(text: &str) -> Option<u8> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parse `MM-DDThh:mm` (optionally prefixed by a year, suffixed by seconds
/// or `Z`). Sentinel strings and anything unparseable map to
/// [`Eta::NOT_AVAILABLE`].
pub fn parse_eta(text: &str) -> Eta {
    let text = text.trim();
    if text.is_empty() || text == "00-00T00:00Z" || text == "00-00T24:60Z" {
        return Eta::NOT_AVAILABLE;
    }
    let Some((date, time)) = text.split_once('T') else {
        return Eta::NOT_AVAILABLE;
    };
    let mut date_parts = date.rsplit('-');
    let day = date_parts.next().and_then(leading_number);
    let month = date_parts.next().and_then(leading_number);
    let mut time_parts = time.split(':');
    let hour = time_parts.next().and_then(leading_number);
    let minute = time_parts.next().and_then(leading_number);

    match (month, day, hour, minute) {
        (Some(month), Some(day), Some(hour), Some(minute))
            if (1..=12).contains(&month)
                && (1..=31).contains(&day)
                && hour <= 23
                && minute <= 59 =>
        {
            Eta {
                month,
                day,
                hour,
                minute,
            }
        }
        _ => Eta::NOT_AVAILABLE,
    }
}

/// Derive antenna-relative dimensions from hull design and sensor offsets.
pub fn dimensions(design: &Design, sensor: &AisSensor) -> Dimensions {
    let length = design.length_overall.unwrap_or(0.0);
    let beam = design.beam.unwrap_or(0.0);
    let from_bow = sensor.from_bow.unwrap_or(0.0);
    let from_center = sensor.from_center.unwrap_or(0.0);

    let metres = |v: f64, max: f64| {
        if v.is_finite() {
            v.max(0.0).round().min(max)
        } else {
            0.0
        }
    };

    Dimensions {
        to_bow: metres(from_bow, 511.0) as u16,
        to_stern: metres(length - from_bow, 511.0) as u16,
        to_port: metres(beam / 2.0 - from_center, 63.0) as u8,
        to_starboard: metres(beam / 2.0 + from_center, 63.0) as u8,
    }
}

fn draught_field(draft: Option<f64>) -> u64 {
    match draft {
        Some(d) if d.is_finite() && d > 0.0 => (d * 10.0).round().min(255.0) as u64,
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

/// Encode a Type 1 position report payload.
pub fn encode_position_report(
    vessel: &VesselSnapshot,
    config: &EncoderConfig,
) -> Result<String, SkipReason> {
    check_mmsi(vessel.mmsi)?;
    let pos = vessel
        .position()
        .filter(|p| p.latitude.is_finite() && p.longitude.is_finite())
        .ok_or(SkipReason::MissingPosition)?;

    let sog = vessel.sog();
    let rot = vessel.navigation.rate_of_turn.as_ref().map(|r| r.value);

    let mut w = BitWriter::with_capacity(POSITION_REPORT_BITS);
    w.push_uint(1, 6);
    w.push_uint(0, 2);
    w.push_uint(vessel.mmsi as u64, 30);
    w.push_uint(vessel.nav_status().code() as u64, 4);
    w.push_int(rot_field(rot), 8);
    w.push_uint(sog_field(sog, config.min_alarm_sog), 10);
    w.push_uint(0, 1);
    w.push_int(coordinate_field(pos.longitude, 180.0), 28);
    w.push_int(coordinate_field(pos.latitude, 90.0), 27);
    w.push_uint(cog_field(vessel.cog(), sog, config.min_alarm_sog), 12);
    w.push_uint(heading_field(vessel.heading()), 9);
    w.push_uint(TIMESTAMP_NOT_AVAILABLE, 6);
    w.push_uint(0, 2);
    w.push_uint(0, 3);
    w.push_uint(0, 1);
    w.push_uint(0, 19);
    debug_assert_eq!(w.len(), POSITION_REPORT_BITS);

    Ok(w.into_payload())
}

/// Encode a Type 5 static and voyage data payload.
pub fn encode_static_voyage(vessel: &VesselSnapshot) -> Result<String, SkipReason> {
    check_mmsi(vessel.mmsi)?;

    let imo = vessel.imo.filter(|&i| i <= MMSI_MAX).unwrap_or(0);
    let dims = dimensions(&vessel.design, &vessel.sensor);
    let eta = vessel
        .navigation
        .eta
        .as_ref()
        .map(|e| parse_eta(&e.value))
        .unwrap_or(Eta::NOT_AVAILABLE);
    let destination = vessel
        .navigation
        .destination
        .as_ref()
        .map(|d| d.value.as_str())
        .unwrap_or_default();

    let mut w = BitWriter::with_capacity(STATIC_VOYAGE_BITS);
    w.push_uint(5, 6);
    w.push_uint(0, 2);
    w.push_uint(vessel.mmsi as u64, 30);
    w.push_uint(0, 2);
    w.push_uint(imo as u64, 30);
    w.push_bits(&callsign_to_six_bit(vessel.callsign.as_deref().unwrap_or_default()));
    w.push_bits(&text_to_six_bit(vessel.name.as_deref().unwrap_or_default(), 20));
    w.push_uint(vessel.design.ship_type.unwrap_or(0) as u64, 8);
    w.push_uint(dims.to_bow as u64, 9);
    w.push_uint(dims.to_stern as u64, 9);
    w.push_uint(dims.to_port as u64, 6);
    w.push_uint(dims.to_starboard as u64, 6);
    w.push_uint(epfd_type(vessel.navigation.position_source.as_deref()) as u64, 4);
    w.push_uint(eta.month as u64, 4);
    w.push_uint(eta.day as u64, 5);
    w.push_uint(eta.hour as u64, 5);
    w.push_uint(eta.minute as u64, 6);
    w.push_uint(draught_field(vessel.design.max_draft), 8);
    w.push_bits(&text_to_six_bit(destination, 20));
    w.push_uint(0, 1);
    w.push_uint(0, 1);
    debug_assert_eq!(w.len(), STATIC_VOYAGE_BITS);

    Ok(w.into_payload())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
