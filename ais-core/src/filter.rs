//! Eligibility filter: decide which merged vessels may be broadcast.
//!
//! Rules run in a fixed order: own ship, stale position, SOG decay,
//! identity, callsign policy. Each drop is counted in [`FilterStats`].

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::types::{Mmsi, Position, VesselSnapshot, PLACEHOLDER_CALLSIGN};

// ---------------------------------------------------------------------------
// Haversine
// ---------------------------------------------------------------------------

const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_NM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

pub fn within_radius(center: Position, point: Position, radius_nm: f64) -> bool {
    haversine_nm(center.latitude, center.longitude, point.latitude, point.longitude) <= radius_nm
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a vessel was removed from the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    OwnShip,
    Stale,
    NoIdentity,
    NoCallsign,
}

/// Per-cycle counters for the summary log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub own_ship: usize,
    pub stale: usize,
    pub no_identity: usize,
    pub no_callsign: usize,
    pub sog_decayed: usize,
    pub placeholder_callsigns: usize,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.own_ship + self.stale + self.no_identity + self.no_callsign
    }

    fn count(&mut self, reason: DropReason) {
        match reason {
            DropReason::OwnShip => self.own_ship += 1,
            DropReason::Stale => self.stale += 1,
            DropReason::NoIdentity => self.no_identity += 1,
            DropReason::NoCallsign => self.no_callsign += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    pub own_mmsi: Option<Mmsi>,
    /// Drop vessels whose position is older than this.
    pub stale_after: Option<Duration>,
    /// Report SOG 0 for vessels whose position is older than this.
    pub sog_decay_after: Option<Duration>,
    pub skip_without_callsign: bool,
}

impl EligibilityFilter {
    pub fn from_config(config: &Config) -> Self {
        EligibilityFilter {
            own_mmsi: config.local.own_mmsi,
            stale_after: config.stale_threshold(),
            sog_decay_after: config.sog_decay_threshold(),
            skip_without_callsign: config.filter.skip_without_callsign,
        }
    }

    /// Run every rule against one vessel. On success the vessel may have had
    /// its SOG zeroed or a placeholder callsign substituted.
    pub fn check(
        &self,
        mut vessel: VesselSnapshot,
        now: DateTime<Utc>,
    ) -> Result<VesselSnapshot, DropReason> {
        if self.own_mmsi == Some(vessel.mmsi) {
            return Err(DropReason::OwnShip);
        }

        let age = vessel.position_age(now);
        if let (Some(limit), Some(age)) = (self.stale_after, age) {
            if age > limit {
                return Err(DropReason::Stale);
            }
        }

        if let (Some(limit), Some(age)) = (self.sog_decay_after, age) {
            if age > limit {
                if let Some(sog) = vessel.navigation.speed_over_ground.as_mut() {
                    sog.value = 0.0;
                }
            }
        }

        if !vessel.has_usable_name() && !vessel.has_usable_callsign() {
            return Err(DropReason::NoIdentity);
        }

        if !vessel.has_usable_callsign() {
            if self.skip_without_callsign {
                return Err(DropReason::NoCallsign);
            }
            vessel.callsign = Some(PLACEHOLDER_CALLSIGN.to_string());
        }

        Ok(vessel)
    }

    /// Filter a whole cycle, preserving order.
    pub fn apply(
        &self,
        vessels: Vec<VesselSnapshot>,
        now: DateTime<Utc>,
    ) -> (Vec<VesselSnapshot>, FilterStats) {
        let mut stats = FilterStats::default();
        let mut kept = Vec::with_capacity(vessels.len());

        for vessel in vessels {
            let had_callsign = vessel.has_usable_callsign();
            let sog_before = vessel.sog();
            match self.check(vessel, now) {
                Ok(v) => {
                    if !had_callsign {
                        stats.placeholder_callsigns += 1;
                    }
                    if sog_before != 0.0 && v.sog() == 0.0 {
                        stats.sog_decayed += 1;
                    }
                    kept.push(v);
                }
                Err(reason) => stats.count(reason),
            }
        }

        stats.kept = kept.len();
        (kept, stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stamped;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn vessel(mmsi: Mmsi, minutes_old: i64) -> VesselSnapshot {
        let mut v = VesselSnapshot::new(mmsi);
        v.name = Some("ZEEMEEUW".into());
        v.callsign = Some("PD1234".into());
        v.navigation.position = Some(Stamped::at(
            Position::new(52.0, 4.0),
            now() - Duration::minutes(minutes_old),
        ));
        v.navigation.speed_over_ground = Some(Stamped::at(3.0, now()));
        v
    }

    fn filter() -> EligibilityFilter {
        EligibilityFilter {
            own_mmsi: Some(244000000),
            stale_after: Some(Duration::minutes(60)),
            sog_decay_after: None,
            skip_without_callsign: false,
        }
    }

    #[test]
    fn test_haversine() {
        // Amsterdam to Rotterdam is roughly 31 nm
        let d = haversine_nm(52.37, 4.89, 51.92, 4.48);
        assert!((d - 31.0).abs() < 1.5, "got {d}");
        assert_eq!(haversine_nm(52.0, 4.0, 52.0, 4.0), 0.0);
        assert!(within_radius(Position::new(52.0, 4.0), Position::new(52.1, 4.0), 10.0));
        assert!(!within_radius(Position::new(52.0, 4.0), Position::new(53.0, 4.0), 10.0));
    }

    #[test]
    fn test_own_ship_dropped() {
        assert_eq!(filter().check(vessel(244000000, 1), now()), Err(DropReason::OwnShip));
    }

    #[test]
    fn test_stale_dropped() {
        let f = filter();
        assert_eq!(f.check(vessel(244000001, 90), now()), Err(DropReason::Stale));
        assert!(f.check(vessel(244000001, 30), now()).is_ok());

        let mut lenient = filter();
        lenient.stale_after = None;
        assert!(lenient.check(vessel(244000001, 90), now()).is_ok());
    }

    #[test]
    fn test_untimestamped_position_not_stale() {
        let mut v = vessel(244000001, 0);
        v.navigation.position = Some(Stamped::unstamped(Position::new(52.0, 4.0)));
        assert!(filter().check(v, now()).is_ok());
    }

    #[test]
    fn test_sog_decay_keeps_vessel() {
        let mut f = filter();
        f.stale_after = Some(Duration::minutes(120));
        f.sog_decay_after = Some(Duration::minutes(30));

        let decayed = f.check(vessel(244000001, 45), now()).unwrap();
        assert_eq!(decayed.sog(), 0.0);
        assert_eq!(decayed.position(), Some(Position::new(52.0, 4.0)));

        let fresh = f.check(vessel(244000001, 10), now()).unwrap();
        assert_eq!(fresh.sog(), 3.0);

        assert_eq!(f.check(vessel(244000001, 150), now()), Err(DropReason::Stale));
    }

    #[test]
    fn test_no_identity_always_dropped() {
        let mut v = vessel(244000001, 1);
        v.name = Some("Unknown".into());
        v.callsign = None;
        assert_eq!(filter().check(v, now()), Err(DropReason::NoIdentity));
    }

    #[test]
    fn test_callsign_policy() {
        let mut v = vessel(244000001, 1);
        v.callsign = Some("".into());

        let substituted = filter().check(v.clone(), now()).unwrap();
        assert_eq!(substituted.callsign.as_deref(), Some(PLACEHOLDER_CALLSIGN));

        let mut strict = filter();
        strict.skip_without_callsign = true;
        assert_eq!(strict.check(v, now()), Err(DropReason::NoCallsign));
    }

    #[test]
    fn test_apply_stats() {
        let mut f = filter();
        f.sog_decay_after = Some(Duration::minutes(20));
        let mut anonymous = vessel(244000004, 1);
        anonymous.name = None;
        anonymous.callsign = None;
        let mut no_cs = vessel(244000005, 1);
        no_cs.callsign = None;

        let input = vec![
            vessel(244000000, 1),
            vessel(244000001, 90),
            vessel(244000002, 30),
            vessel(244000003, 1),
            anonymous,
            no_cs,
        ];
        let (kept, stats) = f.apply(input, now());
        let mmsis: Vec<Mmsi> = kept.iter().map(|v| v.mmsi).collect();
        assert_eq!(mmsis, vec![244000002, 244000003, 244000005]);
        assert_eq!(stats.kept, 3);
        assert_eq!(stats.own_ship, 1);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.no_identity, 1);
        assert_eq!(stats.sog_decayed, 1);
        assert_eq!(stats.placeholder_callsigns, 1);
        assert_eq!(stats.dropped(), 3);
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.local.own_mmsi = Some(244000000);
        config.filter.sog_decay_threshold_minutes = 10;
        let f = EligibilityFilter::from_config(&config);
        assert_eq!(f.own_mmsi, Some(244000000));
        assert_eq!(f.stale_after, Some(Duration::minutes(60)));
        assert_eq!(f.sog_decay_after, Some(Duration::minutes(10)));
        assert!(!f.skip_without_callsign);
    }
}
