//! The bridge service: fetch, merge, filter, schedule, write, once per tick.
//!
//! Cycles never overlap. A single task drives them off a
//! `tokio::time::interval` that skips missed ticks, so a slow cycle delays
//! the next one instead of running concurrently with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use ais_core::config::Config;
use ais_core::filter::{EligibilityFilter, FilterStats};
use ais_core::merge::merge_sources;
use ais_core::scheduler::{BroadcastScheduler, CyclePlan, SchedulerConfig, VesselOutcome};
use ais_core::types::{Mmsi, Position, VesselSnapshot};

use crate::sources::{FetchContext, VesselSource};
use crate::transport::SentenceSink;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Outcome hook
// ---------------------------------------------------------------------------

pub type OutcomeHook = Box<dyn Fn(&VesselOutcome) + Send + Sync>;

fn log_outcome(outcome: &VesselOutcome) {
    match outcome {
        VesselOutcome::Sent {
            mmsi,
            tcp,
            udp,
            static_data,
        } => debug!(mmsi, tcp, udp, static_data, "vessel sent"),
        VesselOutcome::Unchanged { mmsi } => debug!(mmsi, "vessel unchanged"),
        VesselOutcome::Skipped { mmsi, reason } => debug!(mmsi, %reason, "vessel skipped"),
    }
}

/// Counts for one cycle, also logged at info.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub local: usize,
    pub cloud: usize,
    pub merged: usize,
    pub filter: FilterStats,
    pub sent: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub tcp_lines: usize,
    pub tcp_clients: usize,
    pub udp_lines: usize,
    pub clients_joined: bool,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct Bridge {
    config: Config,
    clock: Arc<dyn Clock>,
    local: Arc<dyn VesselSource>,
    cloud: Option<Arc<dyn VesselSource>>,
    tcp: Arc<dyn SentenceSink>,
    udp: Option<Arc<dyn SentenceSink>>,
    scheduler: BroadcastScheduler,
    filter: EligibilityFilter,
    own_position: Option<Position>,
    hook: OutcomeHook,
}

impl Bridge {
    pub fn new(config: Config, local: Arc<dyn VesselSource>, tcp: Arc<dyn SentenceSink>) -> Self {
        let mut scheduler_config = SchedulerConfig::from_config(&config);
        scheduler_config.vesselfinder_interval = None;

        Bridge {
            filter: EligibilityFilter::from_config(&config),
            scheduler: BroadcastScheduler::new(scheduler_config),
            config,
            clock: Arc::new(SystemClock),
            local,
            cloud: None,
            tcp,
            udp: None,
            own_position: None,
            hook: Box::new(log_outcome),
        }
    }

    pub fn with_cloud(mut self, source: Arc<dyn VesselSource>) -> Self {
        self.cloud = Some(source);
        self
    }

    /// Attach the UDP sink; VesselFinder cadence comes from the config.
    pub fn with_vesselfinder(mut self, sink: Arc<dyn SentenceSink>) -> Self {
        self.udp = Some(sink);
        self.scheduler = BroadcastScheduler::new(SchedulerConfig::from_config(&self.config));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_outcome_hook(mut self, hook: impl Fn(&VesselOutcome) + Send + Sync + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn own_position(&self) -> Option<Position> {
        self.own_position
    }

    fn fetch_context(&self) -> FetchContext {
        FetchContext {
            own_mmsi: self.config.local.own_mmsi,
            own_position: self
                .own_position
                .or_else(|| self.config.own_fallback_position()),
        }
    }

    fn update_own_position(&mut self, local: &[VesselSnapshot]) {
        let Some(own) = self.config.local.own_mmsi else {
            return;
        };
        let position = local
            .iter()
            .find(|v| v.mmsi == own)
            .and_then(|v| v.position())
            .filter(Position::is_valid);
        if let Some(pos) = position {
            self.own_position = Some(pos);
        }
    }

    /// Run one full cycle. Never fails: every error is contained and logged.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let now = self.clock.now();
        let ctx = self.fetch_context();

        let cloud_source = match (&self.cloud, ctx.own_mmsi, ctx.own_position) {
            (Some(src), Some(_), Some(_)) => Some(src.clone()),
            (Some(_), _, _) => {
                debug!("cloud fetch skipped, own MMSI or position unknown");
                None
            }
            _ => None,
        };
        let (local, cloud) = tokio::join!(fetch_from(self.local.as_ref(), &ctx), async {
            match &cloud_source {
                Some(src) => fetch_from(src.as_ref(), &ctx).await,
                None => Vec::new(),
            }
        });

        self.update_own_position(&local);
        let mut summary = CycleSummary {
            local: local.len(),
            cloud: cloud.len(),
            ..Default::default()
        };

        let merged = merge_sources(local, cloud, now, self.config.name_suffix_threshold());
        summary.merged = merged.len();
        let debug_mmsi = self.config.debug.mmsi;
        let traced = debug_mmsi.and_then(|m| merged.iter().find(|v| v.mmsi == m).cloned());

        let (eligible, filter_stats) = self.filter.apply(merged, now);
        summary.filter = filter_stats;

        summary.clients_joined = self.tcp.take_joined().await;
        let plan = self.scheduler.plan_cycle(&eligible, now, summary.clients_joined);
        for outcome in &plan.outcomes {
            (self.hook)(outcome);
        }
        if let Some(mmsi) = debug_mmsi {
            trace_vessel(mmsi, traced.as_ref(), &eligible, &plan);
        }

        let tcp_lines = plan.tcp_lines();
        if !tcp_lines.is_empty() {
            summary.tcp_clients = self.tcp.send_lines(&tcp_lines).await;
        }
        let udp_lines = plan.udp_lines();
        if let (Some(udp), false) = (&self.udp, udp_lines.is_empty()) {
            udp.send_lines(&udp_lines).await;
        }

        summary.sent = plan.sent();
        summary.unchanged = plan.unchanged();
        summary.skipped = plan.skipped();
        summary.tcp_lines = tcp_lines.len();
        summary.udp_lines = udp_lines.len();

        info!(
            local = summary.local,
            cloud = summary.cloud,
            merged = summary.merged,
            eligible = summary.filter.kept,
            dropped = summary.filter.dropped(),
            sent = summary.sent,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            tcp_lines = summary.tcp_lines,
            tcp_clients = summary.tcp_clients,
            udp_lines = summary.udp_lines,
            "cycle complete"
        );
        summary
    }

    /// Run cycles until `shutdown` flips to true (or its sender is dropped),
    /// then stop. An in-flight cycle is abandoned on shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.update_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.server.update_interval_secs,
            "bridge started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.run_cycle() => {}
            }
        }

        self.stop().await;
    }

    /// Close every sink and forget all per-vessel state.
    pub async fn stop(&mut self) {
        self.tcp.close().await;
        if let Some(udp) = &self.udp {
            udp.close().await;
        }
        self.scheduler.clear();
        self.own_position = None;
        info!("bridge stopped");
    }
}

async fn fetch_from(source: &dyn VesselSource, ctx: &FetchContext) -> Vec<VesselSnapshot> {
    match source.fetch(ctx).await {
        Ok(vessels) => {
            debug!(source = source.name(), vessels = vessels.len(), "fetched");
            vessels
        }
        Err(e) => {
            warn!(
                source = source.name(),
                kind = e.kind(),
                error = %e,
                "fetch failed, no data this cycle"
            );
            Vec::new()
        }
    }
}

fn trace_vessel(
    mmsi: Mmsi,
    merged: Option<&VesselSnapshot>,
    eligible: &[VesselSnapshot],
    plan: &CyclePlan,
) {
    let Some(vessel) = merged else {
        info!(mmsi, "debug vessel not reported by any source");
        return;
    };
    info!(mmsi, snapshot = ?vessel, "debug vessel merged");
    if !eligible.iter().any(|v| v.mmsi == mmsi) {
        info!(mmsi, "debug vessel filtered out");
        return;
    }
    info!(mmsi, outcome = ?plan.outcome_for(mmsi), "debug vessel outcome");
    if let Some(dispatch) = plan.dispatch_for(mmsi) {
        for line in dispatch.tcp.iter().chain(dispatch.udp.iter()) {
            info!(mmsi, sentence = %line, "debug vessel sentence");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use ais_core::nmea::{payload_field, validate};
    use ais_core::types::Stamped;
    use chrono::Duration;
    use reqwest::StatusCode;

    use crate::sources::SourceError;

    // -- test doubles -------------------------------------------------------

    struct StaticSource {
        vessels: Mutex<Vec<VesselSnapshot>>,
        fail: bool,
        calls: AtomicUsize,
        last_ctx: Mutex<Option<FetchContext>>,
    }

    impl StaticSource {
        fn new(vessels: Vec<VesselSnapshot>) -> Arc<Self> {
            Arc::new(StaticSource {
                vessels: Mutex::new(vessels),
                fail: false,
                calls: AtomicUsize::new(0),
                last_ctx: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(StaticSource {
                vessels: Mutex::new(Vec::new()),
                fail: true,
                calls: AtomicUsize::new(0),
                last_ctx: Mutex::new(None),
            })
        }
    }

    #[async_trait::async_trait]
    impl VesselSource for StaticSource {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<VesselSnapshot>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_ctx.lock().unwrap() = Some(*ctx);
            if self.fail {
                return Err(SourceError::Server(StatusCode::BAD_GATEWAY));
            }
            Ok(self.vessels.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<String>>>,
        joined: AtomicBool,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SentenceSink for RecordingSink {
        async fn send_lines(&self, lines: &[String]) -> usize {
            self.batches.lock().unwrap().push(lines.to_vec());
            1
        }

        async fn take_joined(&self) -> bool {
            self.joined.swap(false, Ordering::SeqCst)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(ManualClock(Mutex::new(t0())))
        }

        fn advance(&self, secs: i64) {
            *self.0.lock().unwrap() += Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    // -- fixtures -----------------------------------------------------------

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.server.update_interval_secs = 15;
        config.server.tcp_resend_interval_secs = 30;
        config
    }

    fn vessel(mmsi: Mmsi, name: &str, callsign: &str, lat: f64, lon: f64) -> VesselSnapshot {
        let mut v = VesselSnapshot::new(mmsi);
        v.name = Some(name.into());
        v.callsign = Some(callsign.into());
        v.navigation.position = Some(Stamped::unstamped(Position::new(lat, lon)));
        v
    }

    // -- tests --------------------------------------------------------------

    #[tokio::test]
    async fn test_three_cycle_end_to_end() {
        let local = StaticSource::new(vec![vessel(999999999, "TEST", "TEST1", 1.0, 1.0)]);
        let tcp = Arc::new(RecordingSink::default());
        let clock = ManualClock::new();
        let mut bridge = Bridge::new(config(), local, tcp.clone()).with_clock(clock.clone());

        let first = bridge.run_cycle().await;
        assert_eq!(first.sent, 1);
        let batches = tcp.batches();
        assert_eq!(batches.len(), 1);
        let type1 = &batches[0][0];
        assert!(validate(type1));
        assert_eq!(payload_field(type1).map(str::len), Some(28));

        clock.advance(15);
        let second = bridge.run_cycle().await;
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.tcp_lines, 0);
        assert_eq!(tcp.batches().len(), 1);

        clock.advance(15);
        let third = bridge.run_cycle().await;
        assert_eq!(third.sent, 1);
        let batches = tcp.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(&batches[1][0], type1);
    }

    #[tokio::test]
    async fn test_cloud_failure_keeps_local() {
        let mut cfg = config();
        cfg.local.own_mmsi = Some(244000000);
        cfg.local.own_lat = Some(52.0);
        cfg.local.own_lon = Some(4.0);
        cfg.cloud.enabled = true;

        let local = StaticSource::new(vec![vessel(244000001, "ZEEMEEUW", "PD1234", 52.0, 4.0)]);
        let cloud = StaticSource::failing();
        let tcp = Arc::new(RecordingSink::default());
        let mut bridge = Bridge::new(cfg, local, tcp.clone())
            .with_cloud(cloud.clone())
            .with_clock(ManualClock::new());

        let summary = bridge.run_cycle().await;
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.cloud, 0);
        assert_eq!(summary.sent, 1);
        assert_eq!(tcp.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_cloud_gated_on_own_position() {
        let mut cfg = config();
        cfg.local.own_mmsi = Some(244000000);
        cfg.cloud.enabled = true;

        let local = StaticSource::new(vec![
            vessel(244000000, "OWN SHIP", "PA0000", 52.5, 4.5),
            vessel(244000001, "ZEEMEEUW", "PD1234", 52.0, 4.0),
        ]);
        let cloud = StaticSource::new(vec![vessel(211000001, "HANSA", "DA1234", 52.6, 4.6)]);
        let tcp = Arc::new(RecordingSink::default());
        let clock = ManualClock::new();
        let mut bridge = Bridge::new(cfg, local, tcp)
            .with_cloud(cloud.clone())
            .with_clock(clock.clone());

        let first = bridge.run_cycle().await;
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 0);
        assert_eq!(first.merged, 2);
        assert_eq!(bridge.own_position(), Some(Position::new(52.5, 4.5)));

        clock.advance(15);
        let second = bridge.run_cycle().await;
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 1);
        let ctx = (*cloud.last_ctx.lock().unwrap()).unwrap();
        assert_eq!(ctx.own_mmsi, Some(244000000));
        assert_eq!(ctx.own_position, Some(Position::new(52.5, 4.5)));
        assert_eq!(second.merged, 3);
        assert_eq!(second.sent, 1);
    }

    #[tokio::test]
    async fn test_own_ship_never_broadcast() {
        let mut cfg = config();
        cfg.local.own_mmsi = Some(244000000);
        let local = StaticSource::new(vec![vessel(244000000, "OWN SHIP", "PA0000", 52.5, 4.5)]);
        let tcp = Arc::new(RecordingSink::default());
        let mut bridge = Bridge::new(cfg, local, tcp.clone()).with_clock(ManualClock::new());

        let summary = bridge.run_cycle().await;
        assert_eq!(summary.filter.own_ship, 1);
        assert_eq!(summary.sent, 0);
        assert!(tcp.batches().is_empty());
    }

    #[tokio::test]
    async fn test_client_join_forces_resend() {
        let local = StaticSource::new(vec![vessel(244000001, "ZEEMEEUW", "PD1234", 52.0, 4.0)]);
        let tcp = Arc::new(RecordingSink::default());
        let clock = ManualClock::new();
        let mut bridge = Bridge::new(config(), local, tcp.clone()).with_clock(clock.clone());

        bridge.run_cycle().await;
        clock.advance(15);
        tcp.joined.store(true, Ordering::SeqCst);
        let summary = bridge.run_cycle().await;
        assert!(summary.clients_joined);
        assert_eq!(summary.sent, 1);
        assert_eq!(tcp.batches().len(), 2);
    }

    #[tokio::test]
    async fn test_vesselfinder_cadence() {
        let mut cfg = config();
        cfg.server.tcp_resend_interval_secs = 0;
        cfg.vesselfinder.enabled = true;
        cfg.vesselfinder.host = Some("127.0.0.1".into());
        cfg.vesselfinder.port = Some(5321);
        cfg.vesselfinder.update_rate_secs = 60;

        let local = StaticSource::new(vec![vessel(244000001, "ZEEMEEUW", "PD1234", 52.0, 4.0)]);
        let tcp = Arc::new(RecordingSink::default());
        let udp = Arc::new(RecordingSink::default());
        let clock = ManualClock::new();
        let mut bridge = Bridge::new(cfg, local, tcp.clone())
            .with_vesselfinder(udp.clone())
            .with_clock(clock.clone());

        let first = bridge.run_cycle().await;
        assert_eq!(first.udp_lines, 1);

        clock.advance(15);
        let second = bridge.run_cycle().await;
        assert_eq!(second.udp_lines, 0);

        clock.advance(45);
        let third = bridge.run_cycle().await;
        assert_eq!(third.udp_lines, 1);
        assert_eq!(third.tcp_lines, 0);

        let batches = udp.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches[1][0].starts_with("!AIVDM,1,1,,B,1"));
        assert_eq!(tcp.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_hook_sees_every_outcome() {
        let mut no_position = VesselSnapshot::new(244000002);
        no_position.name = Some("DRIFTER".into());
        let local = StaticSource::new(vec![
            vessel(244000001, "ZEEMEEUW", "PD1234", 52.0, 4.0),
            no_position,
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        let mut bridge = Bridge::new(config(), local, Arc::new(RecordingSink::default()))
            .with_clock(ManualClock::new())
            .with_outcome_hook(move |o| seen_hook.lock().unwrap().push(o.clone()));

        let summary = bridge.run_cycle().await;
        assert_eq!(summary.skipped, 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|o| matches!(o, VesselOutcome::Skipped { mmsi: 244000002, .. })));
    }

    #[tokio::test]
    async fn test_local_failure_is_empty_cycle() {
        let tcp = Arc::new(RecordingSink::default());
        let mut bridge = Bridge::new(config(), StaticSource::failing(), tcp.clone())
            .with_clock(ManualClock::new());
        let summary = bridge.run_cycle().await;
        assert_eq!(summary.local, 0);
        assert_eq!(summary.sent, 0);
        assert!(tcp.batches().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let local = StaticSource::new(vec![vessel(244000001, "ZEEMEEUW", "PD1234", 52.0, 4.0)]);
        let tcp = Arc::new(RecordingSink::default());
        let bridge = Bridge::new(config(), local.clone(), tcp.clone());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(bridge.run(rx));

        for _ in 0..200 {
            if local.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(local.calls.load(Ordering::SeqCst) >= 1);

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(tcp.closed.load(Ordering::SeqCst));
    }
}
