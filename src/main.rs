//! detector-ctl - command line client for strip detector servers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use detector_ctl as ctl;
use serde::Serialize;

use ctl::config::{AppConfig, ConfigLoadResult};
use ctl::protocol::{AcquisitionInfo, DetectorType, RunStatus};
use ctl::{BackgroundAcquisition, Detector, FrameEvent, TcpDialer};

/// Control a detector server and run acquisitions.
#[derive(Parser)]
#[command(name = "detector-ctl", version)]
struct Cli {
    /// Use config.toml from current directory (dev mode)
    #[arg(long)]
    dev: bool,

    /// Config file path
    #[arg(long, conflicts_with = "dev")]
    config: Option<PathBuf>,

    /// Detector host, overriding the config file
    #[arg(long)]
    host: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show detector identification and acquisition settings
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the run status reported on the stop port
    Status,
    /// Run an acquisition and print each frame
    Acquire {
        #[arg(long)]
        frames: Option<i64>,
        #[arg(long)]
        cycles: Option<i64>,
        /// Exposure time in seconds
        #[arg(long)]
        exposure: Option<f64>,
        /// Bits per pixel: 8, 16, 24 or 32
        #[arg(long)]
        dynamic_range: Option<i32>,
        /// Stop the acquisition after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Seconds between progress reports, 0 to disable
        #[arg(long)]
        progress: Option<f64>,
        /// Print frames as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Stop a running acquisition
    Stop,
    /// Write a default config file
    InitConfig,
}

#[derive(Serialize)]
struct DetectorSummary {
    host: String,
    detector_type: DetectorType,
    serial_number: i64,
    software_version: i64,
    info: AcquisitionInfo,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Determine config path based on mode
    let config_path = if cli.dev {
        tracing::info!("Dev mode: loading config from current directory");
        PathBuf::from("config.toml")
    } else {
        cli.config.clone().unwrap_or_else(AppConfig::default_path)
    };
    tracing::debug!("Config path: {:?}", config_path);

    if let Command::InitConfig = cli.command {
        AppConfig::default()
            .save(&config_path)
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let mut config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => config,
        ConfigLoadResult::Missing => {
            tracing::info!("Config missing, using defaults");
            AppConfig::default()
        }
        ConfigLoadResult::Invalid(e) => bail!("invalid config {}: {e}", config_path.display()),
    };
    if let Some(host) = cli.host {
        config.detector.host = host;
    }
    config.detector.validate()?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(run(cli.command, config))
}

async fn run(command: Command, mut config: AppConfig) -> anyhow::Result<()> {
    let detector = Detector::from_config(&config.detector);

    match command {
        Command::Info { json } => show_info(&detector, &config.detector.host, json).await,
        Command::Status => {
            let status = detector.run_status().await.context("reading run status")?;
            println!("{}", describe_status(status));
            Ok(())
        }
        Command::Stop => {
            detector.stop_acquisition().await.context("stopping acquisition")?;
            println!("Stopped");
            Ok(())
        }
        Command::Acquire {
            frames,
            cycles,
            exposure,
            dynamic_range,
            timeout,
            progress,
            json,
        } => {
            let acquisition = &mut config.acquisition;
            if let Some(frames) = frames {
                acquisition.nb_frames = frames;
            }
            if let Some(cycles) = cycles {
                acquisition.nb_cycles = cycles;
            }
            if let Some(exposure) = exposure {
                acquisition.exposure_time_secs = exposure;
            }
            if let Some(dynamic_range) = dynamic_range {
                acquisition.dynamic_range = dynamic_range;
            }
            if let Some(progress) = progress {
                acquisition.progress_interval_secs = progress;
            }
            acquire(&detector, &config, timeout.map(Duration::from_secs), json).await
        }
        Command::InitConfig => Ok(()),
    }
}

async fn show_info(detector: &Detector<TcpDialer>, host: &str, json: bool) -> anyhow::Result<()> {
    let summary = DetectorSummary {
        host: host.to_string(),
        detector_type: detector.detector_type().await.context("reading detector type")?,
        serial_number: detector.serial_number().await.context("reading serial number")?,
        software_version: detector.software_version().await.context("reading software version")?,
        info: detector.update_client().await.context("reading detector settings")?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let info = &summary.info;
    println!("Detector:        {:?} at {}", summary.detector_type, summary.host);
    println!("Serial number:   {:#x}", summary.serial_number);
    println!("Software:        {:#x}", summary.software_version);
    println!("Modules:         {}", info.nb_modules);
    println!("Dynamic range:   {} bits ({} bytes/frame)", info.dynamic_range, info.data_bytes);
    println!("Frames x cycles: {} x {}", info.nb_frames, info.nb_cycles);
    println!("Exposure:        {:?}", info.exposure_time);
    println!("Frame period:    {:?}", info.frame_period);
    println!("Last client:     {}", info.last_client_ip);
    Ok(())
}

async fn acquire(
    detector: &Detector<TcpDialer>,
    config: &AppConfig,
    limit: Option<Duration>,
    json: bool,
) -> anyhow::Result<()> {
    let request = config.acquisition.to_request()?;
    let progress_interval = config.acquisition.progress_interval()?;
    let mut background =
        BackgroundAcquisition::new(detector.acquisition(request)).with_progress_interval(progress_interval);
    let info = background.prepare().await.context("preparing acquisition")?.clone();
    tracing::info!("Acquiring {} frame(s)", info.total_frames());
    background.start().await.context("starting acquisition")?;

    let deadline = tokio::time::sleep(limit.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);
    let mut stopping = false;
    let mut received = 0u64;
    let mut failure = None;

    loop {
        tokio::select! {
            event = background.next_event() => match event {
                Some(FrameEvent::Frame(frame)) => {
                    received += 1;
                    if json {
                        println!("{}", serde_json::to_string(&frame)?);
                    } else {
                        println!(
                            "frame {:>5}  {}  {} elements",
                            frame.index(),
                            frame.received_at().format("%H:%M:%S%.3f"),
                            frame.data().len()
                        );
                    }
                }
                Some(FrameEvent::Progress(report)) => {
                    if json {
                        println!("{}", serde_json::to_string(&report)?);
                    } else {
                        eprintln!(
                            "cycle {}/{}  frame {}/{}  exposure {:?} left",
                            report.current_cycle,
                            report.nb_cycles,
                            report.current_frame,
                            report.nb_frames,
                            report.exposure_time_left
                        );
                    }
                }
                Some(FrameEvent::Failed(e)) => failure = Some(e),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                tracing::info!("Interrupted, stopping acquisition");
                stopping = true;
                background.stop().await.context("stopping acquisition")?;
            }
            _ = &mut deadline, if !stopping && limit.is_some() => {
                tracing::info!("Time limit reached, stopping acquisition");
                stopping = true;
                background.stop().await.context("stopping acquisition")?;
            }
        }
    }
    background.join().await?;

    if let Some(e) = failure {
        return Err(e).context(format!("acquisition failed after {received} frame(s)"));
    }
    eprintln!("{received} of {} frame(s) received", info.total_frames());
    Ok(())
}

fn describe_status(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Idle => "idle",
        RunStatus::Error => "error",
        RunStatus::Waiting => "waiting for trigger",
        RunStatus::Finished => "finished, data in memory",
        RunStatus::Transmitting => "transmitting",
        RunStatus::Running => "running",
    }
}
