//! Broadcast scheduler: per-vessel change detection and send planning.
//!
//! Pure logic, no I/O, no clock. The caller passes `now` and the
//! joined-clients marker, gets back a [`CyclePlan`] with the sentences to
//! write and one [`VesselOutcome`] per vessel, and applies it to its sinks.
//!
//! Per vessel per cycle:
//! - `changed`: fingerprint differs from the last one sent, or a client
//!   joined since the previous cycle
//! - `needs_resend`: resend interval set and elapsed since the last TCP send
//! - VesselFinder due: its own interval elapsed since the last UDP batch
//!
//! Nothing due means no encoding at all for that vessel.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::encode::{encode_position_report, encode_static_voyage, EncoderConfig, SkipReason};
use crate::nmea::{frame_payload, MessageIdRotor, DEFAULT_CHANNEL};
use crate::types::{Mmsi, VesselSnapshot};

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// What happened to one vessel in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VesselOutcome {
    Sent {
        mmsi: Mmsi,
        tcp: bool,
        udp: bool,
        static_data: bool,
    },
    Unchanged {
        mmsi: Mmsi,
    },
    Skipped {
        mmsi: Mmsi,
        reason: SkipReason,
    },
}

impl VesselOutcome {
    pub fn mmsi(&self) -> Mmsi {
        match self {
            VesselOutcome::Sent { mmsi, .. }
            | VesselOutcome::Unchanged { mmsi }
            | VesselOutcome::Skipped { mmsi, .. } => *mmsi,
        }
    }
}

/// Sentences produced for one vessel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub mmsi: Mmsi,
    pub tcp: Vec<String>,
    pub udp: Vec<String>,
}

/// Everything the caller needs to carry out one cycle.
#[derive(Debug, Clone, Default)]
pub struct CyclePlan {
    pub message_id: u8,
    pub vesselfinder_due: bool,
    pub dispatches: Vec<Dispatch>,
    pub outcomes: Vec<VesselOutcome>,
}

impl CyclePlan {
    pub fn tcp_lines(&self) -> Vec<String> {
        self.dispatches.iter().flat_map(|d| d.tcp.iter().cloned()).collect()
    }

    pub fn udp_lines(&self) -> Vec<String> {
        self.dispatches.iter().flat_map(|d| d.udp.iter().cloned()).collect()
    }

    pub fn dispatch_for(&self, mmsi: Mmsi) -> Option<&Dispatch> {
        self.dispatches.iter().find(|d| d.mmsi == mmsi)
    }

    pub fn outcome_for(&self, mmsi: Mmsi) -> Option<&VesselOutcome> {
        self.outcomes.iter().find(|o| o.mmsi() == mmsi)
    }

    pub fn sent(&self) -> usize {
        self.count(|o| matches!(o, VesselOutcome::Sent { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, VesselOutcome::Unchanged { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, VesselOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&VesselOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

// ---------------------------------------------------------------------------
// Per-vessel state
// ---------------------------------------------------------------------------

/// Hash over the fields whose change triggers an immediate resend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

pub fn fingerprint(vessel: &VesselSnapshot) -> Fingerprint {
    let nav = &vessel.navigation;
    let bits = |f: &Option<crate::types::Stamped<f64>>| f.as_ref().map(|s| s.value.to_bits());

    let mut h = DefaultHasher::new();
    vessel
        .position()
        .map(|p| (p.latitude.to_bits(), p.longitude.to_bits()))
        .hash(&mut h);
    bits(&nav.speed_over_ground).hash(&mut h);
    bits(&nav.course_over_ground_true).hash(&mut h);
    bits(&nav.heading_true).hash(&mut h);
    nav.state.as_ref().map(|s| s.value.as_str()).hash(&mut h);
    vessel.name.hash(&mut h);
    vessel.callsign.hash(&mut h);
    Fingerprint(h.finish())
}

/// What the scheduler remembers about a vessel between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastState {
    pub fingerprint: Fingerprint,
    pub last_tcp_send: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// `None` disables periodic resend.
    pub resend_interval: Option<Duration>,
    /// `None` disables UDP forwarding.
    pub vesselfinder_interval: Option<Duration>,
    /// Send Type 5 for vessels carrying the placeholder callsign.
    pub static_for_placeholder: bool,
    pub encoder: EncoderConfig,
    pub channel: char,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            resend_interval: Some(Duration::seconds(60)),
            vesselfinder_interval: None,
            static_for_placeholder: true,
            encoder: EncoderConfig::default(),
            channel: DEFAULT_CHANNEL,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        SchedulerConfig {
            resend_interval: config.resend_interval(),
            vesselfinder_interval: config.vesselfinder_interval(),
            static_for_placeholder: !config.filter.skip_without_callsign,
            encoder: EncoderConfig {
                min_alarm_sog: config.filter.min_alarm_sog,
            },
            channel: DEFAULT_CHANNEL,
        }
    }
}

/// Decides, cycle by cycle, which vessels go to which sink.
pub struct BroadcastScheduler {
    config: SchedulerConfig,
    states: HashMap<Mmsi, BroadcastState>,
    message_ids: MessageIdRotor,
    last_vesselfinder_send: Option<DateTime<Utc>>,

    // Counters
    pub cycles: u64,
    pub tcp_sentences: u64,
    pub udp_sentences: u64,
    pub skipped: u64,
}

impl BroadcastScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        BroadcastScheduler {
            config,
            states: HashMap::new(),
            message_ids: MessageIdRotor::default(),
            last_vesselfinder_send: None,
            cycles: 0,
            tcp_sentences: 0,
            udp_sentences: 0,
            skipped: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self, mmsi: Mmsi) -> Option<&BroadcastState> {
        self.states.get(&mmsi)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Forget everything. Used on stop.
    pub fn clear(&mut self) {
        self.states.clear();
        self.last_vesselfinder_send = None;
        self.message_ids = MessageIdRotor::default();
    }

    fn vesselfinder_due(&self, now: DateTime<Utc>) -> bool {
        match (self.config.vesselfinder_interval, self.last_vesselfinder_send) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(interval), Some(last)) => now - last >= interval,
        }
    }

    fn needs_resend(&self, state: Option<&BroadcastState>, now: DateTime<Utc>) -> bool {
        match (self.config.resend_interval, state.and_then(|s| s.last_tcp_send)) {
            (Some(interval), Some(last)) => now - last >= interval,
            _ => false,
        }
    }

    /// Plan one cycle over the eligible vessels.
    pub fn plan_cycle(
        &mut self,
        vessels: &[VesselSnapshot],
        now: DateTime<Utc>,
        clients_joined: bool,
    ) -> CyclePlan {
        self.cycles += 1;
        let vf_due = self.vesselfinder_due(now);
        let mut plan = CyclePlan {
            message_id: self.message_ids.rotate(),
            vesselfinder_due: vf_due,
            ..Default::default()
        };

        for vessel in vessels {
            let outcome = self.plan_vessel(vessel, now, clients_joined, vf_due, &mut plan);
            plan.outcomes.push(outcome);
        }

        if vf_due {
            self.last_vesselfinder_send = Some(now);
        }
        plan
    }

    fn plan_vessel(
        &mut self,
        vessel: &VesselSnapshot,
        now: DateTime<Utc>,
        clients_joined: bool,
        vf_due: bool,
        plan: &mut CyclePlan,
    ) -> VesselOutcome {
        let mmsi = vessel.mmsi;
        let fp = fingerprint(vessel);
        let previous = self.states.get(&mmsi);
        let changed = clients_joined || previous.map(|s| s.fingerprint) != Some(fp);
        let send_tcp = changed || self.needs_resend(previous, now);

        if !send_tcp && !vf_due {
            return VesselOutcome::Unchanged { mmsi };
        }

        let last_tcp_send = previous.and_then(|s| s.last_tcp_send);
        self.states.insert(
            mmsi,
            BroadcastState {
                fingerprint: fp,
                last_tcp_send,
            },
        );

        let position = match encode_position_report(vessel, &self.config.encoder) {
            Ok(payload) => frame_payload(&payload, plan.message_id, self.config.channel),
            Err(reason) => {
                self.skipped += 1;
                return VesselOutcome::Skipped { mmsi, reason };
            }
        };

        let mut dispatch = Dispatch {
            mmsi,
            ..Default::default()
        };
        let mut static_data = false;

        if send_tcp {
            dispatch.tcp.extend(position.iter().cloned());
            if vessel.has_usable_callsign() || self.config.static_for_placeholder {
                if let Ok(payload) = encode_static_voyage(vessel) {
                    dispatch
                        .tcp
                        .extend(frame_payload(&payload, plan.message_id, self.config.channel));
                    static_data = true;
                }
            }
            if let Some(state) = self.states.get_mut(&mmsi) {
                state.last_tcp_send = Some(now);
            }
        }
        if vf_due {
            dispatch.udp.extend(position);
        }

        self.tcp_sentences += dispatch.tcp.len() as u64;
        self.udp_sentences += dispatch.udp.len() as u64;
        plan.dispatches.push(dispatch);

        VesselOutcome::Sent {
            mmsi,
            tcp: send_tcp,
            udp: vf_due,
            static_data,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
