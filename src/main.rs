use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eegtap::mock::SimulatedDevice;
use eegtap::storage::ArrayReader;
use eegtap::{DeviceRole, DeviceServer, IngestConfig, RealtimeStats, SessionManager, StatsMonitor};

#[derive(Parser)]
#[command(
    name = "eegtap",
    version,
    about = "Ingestion server for a 32-channel EEG amplifier and trigger box"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Accept device connections and record sessions
    Serve(ServeArgs),
    /// Act as a device and stream frames to a running server
    Simulate(SimulateArgs),
    /// Print shape and summary statistics of a stored array
    Inspect(InspectArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// JSON configuration file
    #[arg(long, env = "EEG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(long)]
    port: Option<u16>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Wait for a `listen` command instead of starting the server immediately
    #[arg(long)]
    manual: bool,

    /// Start recording as soon as the server is up
    #[arg(long)]
    record: bool,

    #[arg(long)]
    account: Option<String>,

    #[arg(long)]
    user_id: Option<i64>,

    /// Run for this many seconds, then stop; otherwise read commands from stdin
    #[arg(long)]
    duration: Option<u64>,

    /// Seconds between stats reports
    #[arg(long, default_value_t = 5)]
    report_secs: u64,
}

#[derive(Args)]
struct SimulateArgs {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:5001")]
    addr: SocketAddr,

    /// signal|marker (eeg|trigger also accepted)
    #[arg(long, default_value = "signal")]
    role: DeviceRole,

    #[arg(long, default_value_t = 10_000)]
    frames: u32,

    /// Frames per second; 0 sends as fast as possible
    #[arg(long, default_value_t = 1000.0)]
    rate: f64,

    /// Skip every K-th sequence number
    #[arg(long)]
    drop_every: Option<u32>,
}

#[derive(Args)]
struct InspectArgs {
    /// Path to an .h5 store file
    file: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Simulate(args) => simulate(args),
        Command::Inspect(args) => inspect(args),
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let mut config = IngestConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.recording.data_dir = dir;
    }

    let stats = Arc::new(RealtimeStats::new());
    let manager = Arc::new(
        SessionManager::new(config.recording.clone(), stats.clone())
            .context("Failed to prepare data directory")?,
    );
    let server = DeviceServer::new(config.server.clone(), manager.clone(), stats.clone());

    if config.auto_start || !args.manual {
        server.start().context("Failed to start device server")?;
    }
    if args.record {
        manager.start_new_session(args.user_id, args.account.as_deref())?;
    }

    let reporting = Arc::new(AtomicBool::new(true));
    let reporter = spawn_reporter(
        StatsMonitor::new(stats.clone()),
        reporting.clone(),
        Duration::from_secs(args.report_secs.max(1)),
    )?;

    match args.duration {
        Some(secs) => thread::sleep(Duration::from_secs(secs)),
        None => command_loop(&server, &manager, args.user_id, args.account.as_deref())?,
    }

    reporting.store(false, Ordering::Release);
    if manager.is_recording() {
        let id = manager.stop_session()?;
        println!("Stopped {}", id);
    }
    if server.is_running() {
        server.stop()?;
    }
    let _ = reporter.join();
    Ok(())
}

fn spawn_reporter(
    monitor: StatsMonitor,
    running: Arc<AtomicBool>,
    every: Duration,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("eegtap-report".to_string())
        .spawn(move || {
            let mut last = Instant::now();
            while running.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(100));
                if last.elapsed() >= every {
                    log::info!("\n{}", monitor.generate_report());
                    last = Instant::now();
                }
            }
        })?;
    Ok(handle)
}

fn command_loop(
    server: &DeviceServer,
    manager: &SessionManager,
    user_id: Option<i64>,
    account: Option<&str>,
) -> Result<()> {
    println!("Commands: listen, unlisten, start-cmd, start, stop, status, sessions, quit");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let outcome = match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "listen" => server.start().map(|addr| println!("Listening on {}", addr)),
            "unlisten" => server.stop().map(|_| println!("Server stopped")),
            "start-cmd" => server
                .send_start_command()
                .map(|n| println!("Sent {} start datagrams", n)),
            "start" => manager
                .start_new_session(user_id, account)
                .map(|id| println!("Recording {}", id)),
            "stop" => manager.stop_session().map(|id| println!("Stopped {}", id)),
            "status" => {
                println!("{}", serde_json::to_string_pretty(&manager.get_status())?);
                Ok(())
            }
            "sessions" => manager.stored_sessions().map(|sessions| {
                for s in sessions {
                    println!("{}  {} samples  {:.1}s  {:?}", s.id, s.sample_count, s.duration, s.directory);
                }
            }),
            other => {
                println!("Unknown command: {}", other);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!("Error: {}", e);
        }
    }

    Ok(())
}

fn simulate(args: SimulateArgs) -> Result<()> {
    let mut device = SimulatedDevice::connect(args.addr, args.role)
        .with_context(|| format!("Failed to connect to {}", args.addr))?;

    let report = device.stream(args.frames, args.rate, args.drop_every)?;
    device.finish()?;

    println!(
        "Sent {} {} frames ({} skipped), last sequence {}",
        report.sent, args.role, report.skipped, report.last_sequence
    );
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<()> {
    let reader = ArrayReader::open(&args.file)?;

    let (shape, channels) = if reader.holds::<f32>() {
        let array = reader.read::<f32>()?;
        let summaries = (0..array.channels)
            .map(|ch| summarize(array.channel(ch).iter().map(|v| *v as f64)))
            .collect::<Vec<_>>();
        (array.shape(), summaries)
    } else if reader.holds::<i32>() {
        let array = reader.read::<i32>()?;
        let summaries = (0..array.channels)
            .map(|ch| summarize(array.channel(ch).iter().map(|v| *v as f64)))
            .collect::<Vec<_>>();
        (array.shape(), summaries)
    } else {
        bail!("Unsupported element type in {:?}", args.file);
    };

    match reader.chunk_len() {
        Some(chunk_len) => println!("{:?}: shape {:?}, chunk length {}", args.file, shape, chunk_len),
        None => println!("{:?}: shape {:?}, contiguous", args.file, shape),
    }
    for (ch, summary) in channels.iter().enumerate() {
        match summary {
            Some((min, max, mean)) => println!("  ch{:02}  min {:10.3}  max {:10.3}  mean {:10.3}", ch, min, max, mean),
            None => println!("  ch{:02}  (empty)", ch),
        }
    }
    Ok(())
}

fn summarize(values: impl Iterator<Item = f64>) -> Option<(f64, f64, f64)> {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        count += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    (count > 0).then(|| (min, max, sum / count as f64))
}
