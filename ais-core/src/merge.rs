//! Merge engine: reconcile local and cloud snapshots into one view per MMSI.
//!
//! Pure functions only. The local registry is always the held side, so on
//! ties (equal timestamps, equally usable names) local data wins.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::types::{
    is_usable_callsign, is_usable_name, AisSensor, Design, Mmsi, Navigation, Stamped,
    VesselSnapshot,
};

/// Width of the AIS name field.
pub const MAX_NAME_CHARS: usize = 20;

// ---------------------------------------------------------------------------
// Field rules
// ---------------------------------------------------------------------------

fn merge_text(
    held: Option<String>,
    incoming: Option<String>,
    usable: fn(Option<&str>) -> bool,
) -> Option<String> {
    match (usable(held.as_deref()), usable(incoming.as_deref())) {
        (true, _) => held,
        (false, true) => incoming,
        (false, false) => held.or(incoming),
    }
}

/// Later timestamp wins; timestamped beats untimestamped; otherwise
/// incoming where present.
fn merge_stamped<T>(held: Option<Stamped<T>>, incoming: Option<Stamped<T>>) -> Option<Stamped<T>> {
    match (held, incoming) {
        (Some(h), Some(i)) => match (h.timestamp, i.timestamp) {
            (Some(ht), Some(it)) => Some(if it > ht { i } else { h }),
            (Some(_), None) => Some(h),
            (None, _) => Some(i),
        },
        (h, i) => i.or(h),
    }
}

fn merge_navigation(held: Navigation, incoming: Navigation) -> Navigation {
    Navigation {
        position: merge_stamped(held.position, incoming.position),
        speed_over_ground: merge_stamped(held.speed_over_ground, incoming.speed_over_ground),
        course_over_ground_true: merge_stamped(
            held.course_over_ground_true,
            incoming.course_over_ground_true,
        ),
        heading_true: merge_stamped(held.heading_true, incoming.heading_true),
        rate_of_turn: merge_stamped(held.rate_of_turn, incoming.rate_of_turn),
        state: merge_stamped(held.state, incoming.state),
        destination: merge_stamped(held.destination, incoming.destination),
        eta: merge_stamped(held.eta, incoming.eta),
        position_source: incoming.position_source.or(held.position_source),
    }
}

fn merge_design(held: Design, incoming: Design) -> Design {
    Design {
        length_overall: incoming.length_overall.or(held.length_overall),
        beam: incoming.beam.or(held.beam),
        max_draft: incoming.max_draft.or(held.max_draft),
        ship_type: incoming.ship_type.or(held.ship_type),
    }
}

fn merge_sensor(held: AisSensor, incoming: AisSensor) -> AisSensor {
    AisSensor {
        from_bow: incoming.from_bow.or(held.from_bow),
        from_center: incoming.from_center.or(held.from_center),
    }
}

/// Merge two snapshots of the same vessel.
pub fn merge_snapshots(held: VesselSnapshot, incoming: VesselSnapshot) -> VesselSnapshot {
    VesselSnapshot {
        mmsi: held.mmsi,
        imo: incoming.imo.or(held.imo),
        name: merge_text(held.name, incoming.name, is_usable_name),
        callsign: merge_text(held.callsign, incoming.callsign, is_usable_callsign),
        navigation: merge_navigation(held.navigation, incoming.navigation),
        design: merge_design(held.design, incoming.design),
        sensor: merge_sensor(held.sensor, incoming.sensor),
    }
}

// ---------------------------------------------------------------------------
// Age suffix
// ---------------------------------------------------------------------------

/// `MIN<n>` under an hour, `HOUR<n>` under a day, `DAY<n>` beyond.
pub fn age_suffix(age: Duration) -> String {
    let minutes = age.num_minutes().max(0);
    if minutes < 60 {
        format!("MIN{minutes}")
    } else if minutes < 24 * 60 {
        format!("HOUR{}", minutes / 60)
    } else {
        format!("DAY{}", minutes / (24 * 60))
    }
}

/// Append ` <suffix>` to `name`, shortening the name so the result fits
/// the AIS name field.
pub fn append_age_suffix(name: &str, suffix: &str) -> String {
    let name = name.trim();
    let room = MAX_NAME_CHARS.saturating_sub(suffix.chars().count() + 1);
    let short: String = name.chars().take(room).collect();
    let combined = format!("{} {suffix}", short.trim_end());
    combined.chars().take(MAX_NAME_CHARS).collect()
}

fn mark_stale_name(vessel: &mut VesselSnapshot, now: DateTime<Utc>, threshold: Duration) {
    if !vessel.has_usable_name() {
        return;
    }
    let Some(age) = vessel.position_age(now) else {
        return;
    };
    if age <= threshold {
        return;
    }
    if let Some(name) = vessel.name.as_deref() {
        vessel.name = Some(append_age_suffix(name, &age_suffix(age)));
    }
}

// ---------------------------------------------------------------------------
// Cycle merge
// ---------------------------------------------------------------------------

/// Build the per-cycle vessel set from both sources, ordered by MMSI.
///
/// `name_suffix_threshold` of `None` disables the age suffix on cloud-only
/// vessels.
pub fn merge_sources(
    local: Vec<VesselSnapshot>,
    cloud: Vec<VesselSnapshot>,
    now: DateTime<Utc>,
    name_suffix_threshold: Option<Duration>,
) -> Vec<VesselSnapshot> {
    let mut merged: BTreeMap<Mmsi, (VesselSnapshot, bool)> = BTreeMap::new();

    for vessel in local {
        let entry = match merged.remove(&vessel.mmsi) {
            Some((held, _)) => merge_snapshots(held, vessel),
            None => vessel,
        };
        merged.insert(entry.mmsi, (entry, true));
    }

    for vessel in cloud {
        let entry = match merged.remove(&vessel.mmsi) {
            Some((held, in_local)) => (merge_snapshots(held, vessel), in_local),
            None => (vessel, false),
        };
        merged.insert(entry.0.mmsi, entry);
    }

    merged
        .into_values()
        .map(|(mut vessel, in_local)| {
            if let (false, Some(threshold)) = (in_local, name_suffix_threshold) {
                mark_stale_name(&mut vessel, now, threshold);
            }
            vessel
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
