//! CAN Signal Monitor CLI Application
//!
//! This is the command-line front end for the CAN signal monitor.
//! It uses the can-monitor-core library and adds:
//! - TOML configuration with command-line overrides
//! - Rule catalog selection
//! - candump replay through the simulated interface
//! - Console status/signal output and an end-of-run summary

use anyhow::{Context, Result};
use can_monitor_core::source::{default_channel_names, load_candump, probe_channels};
use can_monitor_core::{Bitrate, ConnectionSupervisor, RuleCatalog, SignalMatcher, SimulatedBus};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod config;
mod events;
mod replay;
mod report;

/// CAN Signal Monitor - Detect the bus bit rate and watch configured signals
#[derive(Parser, Debug)]
#[command(name = "can-monitor")]
#[command(about = "Detect the CAN bit rate and match frames against signal rules", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (monitor.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON rule catalog (overrides [rules] file)
    #[arg(short, long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// Configuration name inside the catalog (default: first)
    #[arg(long, value_name = "NAME")]
    configuration: Option<String>,

    /// Interface channel (overrides [connection] channel)
    #[arg(long, value_name = "CHANNEL")]
    channel: Option<String>,

    /// candump log to replay through the simulated interface
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Bit rate the replayed bus runs at
    #[arg(long, value_name = "BPS")]
    bus_bitrate: Option<u32>,

    /// Replay with the recorded timing
    #[arg(long)]
    pace: bool,

    /// Candidate bit rates to try, in order (comma separated)
    #[arg(long, value_name = "BPS", value_delimiter = ',')]
    bitrates: Vec<u32>,

    /// How long each candidate bit rate is listened to, in milliseconds
    #[arg(long, value_name = "MS")]
    detection_timeout_ms: Option<u64>,

    /// Extra detection runs before giving up
    #[arg(long, value_name = "COUNT")]
    retries: Option<u32>,

    /// Exit with an error instead of continuing offline when detection fails
    #[arg(long)]
    no_offline: bool,

    /// How long to monitor, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    duration: u64,

    /// Simulate pulling the interface after this many seconds
    #[arg(long, value_name = "SECS")]
    unplug_after: Option<u64>,

    /// List the configurations in the catalog and exit
    #[arg(long)]
    list: bool,

    /// List the channels that can be opened and exit
    #[arg(long)]
    probe: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Signal Monitor CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using monitor library v{}", can_monitor_core::VERSION);

    let app = resolve_config(&args)?;

    let rules_path = app
        .rules
        .file
        .clone()
        .context("No rule catalog given (use --rules or [rules] file)")?;
    let catalog = RuleCatalog::load(&rules_path)
        .with_context(|| format!("Failed to load rule catalog: {:?}", rules_path))?;

    if args.list {
        for name in catalog.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let configuration = match &app.rules.configuration {
        Some(name) => catalog.require(name)?,
        None => catalog
            .configurations()
            .first()
            .context("Rule catalog contains no configurations")?,
    };

    let matcher = Arc::new(SignalMatcher::new());
    matcher
        .load_rules(configuration.rules.clone())
        .with_context(|| format!("Configuration '{}' was rejected", configuration.name))?;

    let bus = Arc::new(build_bus(&app)?);

    if args.probe {
        let bitrate = app
            .connection
            .monitor
            .candidate_bitrates
            .first()
            .copied()
            .unwrap_or(Bitrate::K500);
        for channel in probe_channels(bus.as_ref(), &default_channel_names(), bitrate) {
            println!("{}", channel);
        }
        return Ok(());
    }

    monitor(&args, &app, &configuration.name, bus, matcher)
}

/// Merge the config file with command-line overrides
fn resolve_config(args: &Args) -> Result<config::AppConfig> {
    let mut app = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => config::AppConfig::default(),
    };

    if let Some(rules) = &args.rules {
        app.rules.file = Some(rules.clone());
    }
    if let Some(name) = &args.configuration {
        app.rules.configuration = Some(name.clone());
    }
    if let Some(channel) = &args.channel {
        app.connection.channel = channel.clone();
    }
    if !args.bitrates.is_empty() {
        let candidates = args.bitrates.iter().copied().map(Bitrate).collect();
        app.connection.monitor = app.connection.monitor.with_candidates(candidates);
    }
    if let Some(ms) = args.detection_timeout_ms {
        app.connection.monitor = app
            .connection
            .monitor
            .with_detection_timeout(Duration::from_millis(ms));
    }
    if let Some(retries) = args.retries {
        app.connection.detection_retries = retries;
    }
    if args.no_offline {
        app.connection.offline_on_failure = false;
    }
    if let Some(file) = &args.replay {
        app.replay = Some(config::ReplayConfig {
            file: file.clone(),
            bus_bitrate: Bitrate::K500,
            pace: false,
        });
    }
    if let Some(replay) = app.replay.as_mut() {
        if let Some(bps) = args.bus_bitrate {
            replay.bus_bitrate = Bitrate(bps);
        }
        replay.pace |= args.pace;
    }

    Ok(app)
}

/// The interface stand-in: a replayed bus, or a silent one without a recording
fn build_bus(app: &config::AppConfig) -> Result<SimulatedBus> {
    let channels = vec![app.connection.channel.clone()];
    match &app.replay {
        Some(replay) => {
            log::info!("Simulated bus at {} replaying {:?}", replay.bus_bitrate, replay.file);
            Ok(SimulatedBus::new(replay.bus_bitrate).with_channels(channels))
        }
        None => {
            log::warn!("No replay file given; the simulated bus carries no traffic");
            Ok(SimulatedBus::silent().with_channels(channels))
        }
    }
}

fn monitor(
    args: &Args,
    app: &config::AppConfig,
    configuration: &str,
    bus: Arc<SimulatedBus>,
    matcher: Arc<SignalMatcher>,
) -> Result<()> {
    if !args.quiet {
        println!("═══════════════════════════════════════════════");
        println!("  CAN Signal Monitor");
        println!("═══════════════════════════════════════════════\n");
        println!("Configuration: {} ({} signals)", configuration, matcher.rule_count());
        println!("Channel:       {}\n", app.connection.channel);
    }

    let feeder = match &app.replay {
        Some(replay) => {
            let frames = load_candump(&replay.file)
                .with_context(|| format!("Failed to load replay file: {:?}", replay.file))?;
            Some(replay::spawn_feeder(Arc::clone(&bus), frames, replay.pace)?)
        }
        None => None,
    };

    let quiet = args.quiet;
    let mut supervisor = ConnectionSupervisor::new(
        Arc::clone(&bus) as Arc<dyn can_monitor_core::FrameSource>,
        Arc::clone(&matcher),
        app.connection.monitor.clone(),
    )
    .with_detection_progress(move |bitrate| {
        if !quiet {
            println!("{}", events::progress_line(bitrate));
        }
    });
    events::attach(&supervisor, &matcher, quiet);

    let mut result = supervisor.start_detection(&app.connection.channel)?;
    let mut retries_left = app.connection.detection_retries;
    while !result.is_success() && retries_left > 0 {
        retries_left -= 1;
        log::info!("Retrying detection ({} retries left)", retries_left);
        result = supervisor.retry_detection()?;
    }

    if !result.is_success() {
        if !app.connection.offline_on_failure {
            anyhow::bail!(
                "Failed to detect baud rate on {}. Check the interface is connected and the bus is active.",
                app.connection.channel
            );
        }
        supervisor.continue_offline()?;
    }

    let started = Instant::now();
    let run_for = Duration::from_secs(args.duration);
    let unplug_at = args.unplug_after.map(Duration::from_secs);
    let mut unplugged = false;

    while started.elapsed() < run_for {
        if let Some(at) = unplug_at {
            if !unplugged && started.elapsed() >= at {
                log::info!("Simulating interface removal");
                bus.unplug();
                unplugged = true;
            }
        }
        thread::sleep(Duration::from_millis(50));
    }

    let final_status = supervisor.status();
    supervisor.shutdown();

    if let Some(feeder) = feeder {
        if feeder.join().is_err() {
            log::error!("Replay feeder panicked");
        }
    }

    if !args.quiet {
        println!();
        print!(
            "{}",
            report::render(
                &final_status,
                supervisor.last_detection(),
                &matcher.snapshot(),
                matcher.stats(),
            )
        );
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
