//! ais-bridge: CLI + service that turns fleet data into an AIS/NMEA feed.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::watch;

use ais_core::config::{self, Config};
use ais_core::encode::{encode_position_report, encode_static_voyage, EncoderConfig};
use ais_core::filter::EligibilityFilter;
use ais_core::merge::merge_sources;
use ais_core::nmea::{frame_payload, MessageIdRotor, DEFAULT_CHANNEL};
use ais_core::types::{Mmsi, Position, VesselSnapshot};

mod logging;
mod service;
mod sources;
mod transport;

use service::Bridge;
use sources::{CloudFleet, FetchContext, LocalRegistry, VesselSource};
use transport::{TcpBroadcaster, UdpForwarder};

const KNOTS_PER_MS: f64 = 1.94384;

#[derive(Parser)]
#[command(name = "ais-bridge", version, about = "Fleet to AIS/NMEA bridge")]
struct Cli {
    /// Config file (default: ~/.ais-bridge/config.toml)
    #[arg(long, global = true, env = "AIS_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the NMEA TCP port
    #[arg(long, global = true, env = "AIS_BRIDGE_PORT")]
    port: Option<u16>,

    /// Override the local vessel registry URL
    #[arg(long, global = true, env = "AIS_BRIDGE_REGISTRY_URL")]
    registry_url: Option<String>,

    /// Override our own MMSI
    #[arg(long, global = true, env = "AIS_BRIDGE_OWN_MMSI")]
    own_mmsi: Option<Mmsi>,

    /// Debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Trace one vessel through every step at info level
    #[arg(long, global = true)]
    debug_mmsi: Option<Mmsi>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until interrupted
    Run,

    /// Encode a saved registry JSON dump and print the sentences
    Encode {
        /// Path to the JSON file ("-" for stdin)
        file: PathBuf,
    },

    /// Fetch once and print the merged, filtered fleet
    Fleet,

    /// Write a config file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.command {
        cmd_init_config(cli.config.as_deref(), force);
        return;
    }

    let config = load_config(&cli);
    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Encode { file } => cmd_encode(&config, &file),
        Commands::Fleet => cmd_fleet(config).await,
        Commands::InitConfig { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Config {
    let loaded = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });
    apply_overrides(&mut config, cli);
    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {e}");
        std::process::exit(1);
    }
    config
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(port) = cli.port {
        config.server.tcp_port = port;
    }
    if let Some(url) = &cli.registry_url {
        config.local.url = url.clone();
    }
    if let Some(mmsi) = cli.own_mmsi {
        config.local.own_mmsi = Some(mmsi);
    }
    if cli.debug {
        config.debug.enabled = true;
    }
    if let Some(mmsi) = cli.debug_mmsi {
        config.debug.mmsi = Some(mmsi);
    }
}

fn http_client(config: &Config) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.local.timeout_secs.max(1)))
        .user_agent(concat!("ais-bridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error creating HTTP client: {e}");
            std::process::exit(1);
        })
}

fn cloud_source(config: &Config, client: &reqwest::Client) -> Option<Arc<dyn VesselSource>> {
    let url = config.cloud.url.as_ref().filter(|_| config.cloud.enabled)?;
    Some(Arc::new(CloudFleet::new(
        client.clone(),
        url.clone(),
        config.cloud.api_key.clone(),
        config.cloud.radius_nm,
    )))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(config: Config) {
    logging::init_logging(config.debug.enabled);

    let client = http_client(&config);
    let local: Arc<dyn VesselSource> =
        Arc::new(LocalRegistry::new(client.clone(), config.local.url.clone()));

    let addr = format!("0.0.0.0:{}", config.server.tcp_port);
    let tcp = TcpBroadcaster::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Error starting NMEA server: {e}");
        std::process::exit(1);
    });

    let mut bridge = Bridge::new(config.clone(), local, Arc::new(tcp));
    if let Some(cloud) = cloud_source(&config, &client) {
        bridge = bridge.with_cloud(cloud);
    }
    if let (true, Some(host), Some(port)) = (
        config.vesselfinder.enabled,
        config.vesselfinder.host.as_deref(),
        config.vesselfinder.port,
    ) {
        match UdpForwarder::connect(host, port).await {
            Ok(udp) => bridge = bridge.with_vesselfinder(Arc::new(udp)),
            Err(e) => tracing::warn!(error = %e, "VesselFinder disabled"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    bridge.run(shutdown_rx).await;
}

fn cmd_encode(config: &Config, file: &Path) {
    let text = if file.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).map(|_| buf)
    } else {
        std::fs::read_to_string(file)
    }
    .unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", file.display());
        std::process::exit(1);
    });

    let doc: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("Error parsing {}: {e}", file.display());
        std::process::exit(1);
    });
    let vessels = sources::local::normalize_registry(&doc).unwrap_or_else(|e| {
        eprintln!("Error reading registry: {e}");
        std::process::exit(1);
    });

    let encoder = EncoderConfig {
        min_alarm_sog: config.filter.min_alarm_sog,
    };
    let mut ids = MessageIdRotor::default();
    let mut skipped = 0;

    for vessel in &vessels {
        let id = ids.rotate();
        match encode_position_report(vessel, &encoder) {
            Ok(payload) => {
                for line in frame_payload(&payload, id, DEFAULT_CHANNEL) {
                    println!("{line}");
                }
            }
            Err(reason) => {
                eprintln!("{}: {reason}", vessel.label());
                skipped += 1;
                continue;
            }
        }
        if let Ok(payload) = encode_static_voyage(vessel) {
            for line in frame_payload(&payload, id, DEFAULT_CHANNEL) {
                println!("{line}");
            }
        }
    }

    eprintln!();
    eprintln!(
        "{} vessels, {} encoded, {} skipped",
        vessels.len(),
        vessels.len() - skipped,
        skipped
    );
}

async fn cmd_fleet(config: Config) {
    let client = http_client(&config);
    let local = LocalRegistry::new(client.clone(), config.local.url.clone());
    let mut ctx = FetchContext {
        own_mmsi: config.local.own_mmsi,
        own_position: config.own_fallback_position(),
    };

    let local_vessels = local.fetch(&ctx).await.unwrap_or_else(|e| {
        eprintln!("Error fetching {}: {e}", config.local.url);
        std::process::exit(1);
    });
    if let Some(pos) = own_position(&local_vessels, ctx.own_mmsi) {
        ctx.own_position = Some(pos);
    }

    let cloud_vessels = match cloud_source(&config, &client) {
        Some(cloud) => cloud.fetch(&ctx).await.unwrap_or_else(|e| {
            eprintln!("Cloud fetch failed ({}): {e}", e.kind());
            Vec::new()
        }),
        None => Vec::new(),
    };

    let now = Utc::now();
    let (local_count, cloud_count) = (local_vessels.len(), cloud_vessels.len());
    let merged = merge_sources(local_vessels, cloud_vessels, now, config.name_suffix_threshold());
    let filter = EligibilityFilter::from_config(&config);

    let mut table = Table::new();
    table.set_header(vec![
        "MMSI", "Name", "Callsign", "Lat", "Lon", "SOG (kn)", "COG", "Hdg", "Status", "Age",
        "Broadcast",
    ]);

    let mut kept = 0;
    for vessel in &merged {
        let verdict = match filter.check(vessel.clone(), now) {
            Ok(_) => {
                kept += 1;
                "yes".to_string()
            }
            Err(reason) => format!("{reason:?}"),
        };
        let nav = &vessel.navigation;
        let position = vessel.position();
        table.add_row(vec![
            Cell::new(vessel.mmsi),
            Cell::new(vessel.name.as_deref().unwrap_or("-")),
            Cell::new(vessel.callsign.as_deref().unwrap_or("-")),
            Cell::new(
                position
                    .map(|p| format!("{:.4}", p.latitude))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                position
                    .map(|p| format!("{:.4}", p.longitude))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                nav.speed_over_ground
                    .as_ref()
                    .map(|s| format!("{:.1}", s.value * KNOTS_PER_MS))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                nav.course_over_ground_true
                    .as_ref()
                    .map(|c| format!("{:.0}", c.value.to_degrees()))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                nav.heading_true
                    .as_ref()
                    .map(|h| format!("{:.0}", h.value.to_degrees()))
                    .unwrap_or("-".into()),
            ),
            Cell::new(vessel.nav_status()),
            Cell::new(
                vessel
                    .position_age(now)
                    .map(|a| format!("{}m", a.num_minutes()))
                    .unwrap_or("-".into()),
            ),
            Cell::new(verdict),
        ]);
    }

    println!();
    println!(
        "Local: {local_count}  Cloud: {cloud_count}  Merged: {}  Broadcast: {kept}",
        merged.len()
    );
    println!();
    println!("{table}");
}

fn own_position(vessels: &[VesselSnapshot], own: Option<Mmsi>) -> Option<Position> {
    let own = own?;
    vessels
        .iter()
        .find(|v| v.mmsi == own)
        .and_then(VesselSnapshot::position)
        .filter(Position::is_valid)
}

fn cmd_init_config(path: Option<&Path>, force: bool) {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config::config_file);
    if path.exists() && !force {
        eprintln!("{} already exists (use --force to overwrite)", path.display());
        std::process::exit(1);
    }
    if let Err(e) = config::save_config_to(&Config::default(), &path) {
        eprintln!("Error writing {}: {e}", path.display());
        std::process::exit(1);
    }
    println!("Wrote {}", path.display());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
