//! # TrackCar CLI
//!
//! 巡线管线的命令行入口。
//!
//! ```bash
//! # 在内置仿真后端上跑巡线，Ctrl+C 停止
//! trackcar-cli follow
//!
//! # 指定配置文件和极性，限时 10 秒
//! trackcar-cli follow --config track.toml --polarity light --duration-s 10
//!
//! # 查看某组配置派生出的 PD 增益（调参辅助，不运行）
//! trackcar-cli gains --response 1.4 --damping 1.0
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use trackcar_hal::{SimConfig, SimVehicle};
use trackcar_pipeline::{PdGains, PipelineBuilder, PipelineConfig, Polarity};

/// TrackCar CLI - 巡线机器人命令行工具
#[derive(Parser, Debug)]
#[command(name = "trackcar-cli")]
#[command(about = "Command-line runner for the TrackCar line follower", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 在内置仿真后端上运行巡线管线
    Follow {
        /// TOML 配置文件（缺省字段取默认值）
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// 线的明暗极性（dark/light），覆盖配置文件
        #[arg(long)]
        polarity: Option<Polarity>,

        /// 比例响应系数，覆盖配置文件
        #[arg(long)]
        response: Option<f64>,

        /// 运行时长（秒）；缺省一直运行到 Ctrl+C
        #[arg(long)]
        duration_s: Option<f64>,
    },

    /// 打印给定配置派生出的 PD 增益（不运行）
    Gains {
        /// TOML 配置文件（缺省字段取默认值）
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// 比例响应系数，覆盖配置文件
        #[arg(long)]
        response: Option<f64>,

        /// 微分阻尼系数，覆盖配置文件
        #[arg(long)]
        damping: Option<f64>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: PipelineConfig = toml::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        },
        None => Ok(PipelineConfig::default()),
    }
}

fn run_follow(
    config_path: Option<PathBuf>,
    polarity: Option<Polarity>,
    response: Option<f64>,
    duration_s: Option<f64>,
) -> Result<()> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(polarity) = polarity {
        config.interpreter.polarity = polarity;
    }
    if let Some(response) = response {
        config.controller.response_factor = response;
    }

    // Ctrl+C 只翻转停止标志，收尾统一走 Pipeline::shutdown
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Release);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let (sensor, drive) = SimVehicle::spawn(SimConfig::default());
    let mut pipeline = PipelineBuilder::new().with_config(config).build(sensor, drive)?;

    info!("Line follower running on simulator backend. Ctrl+C to stop.");

    let started = Instant::now();
    let deadline = duration_s.map(Duration::from_secs_f64);
    let mut last_report = Instant::now();

    while pipeline.is_running() && !stop.load(Ordering::Acquire) {
        if let Some(limit) = deadline
            && started.elapsed() >= limit
        {
            info!("Requested duration elapsed");
            break;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let snapshot = pipeline.metrics();
            let offset = pipeline.latest_offset().and_then(|s| s.offset);
            info!(
                "offset={:?} samples={} offsets={} skips={} lost={} reacquired={} timed_out={}",
                offset,
                snapshot.raw_samples,
                snapshot.offset_updates,
                snapshot.stale_skips,
                snapshot.line_lost_events,
                snapshot.recoveries_reacquired,
                snapshot.recoveries_timed_out,
            );
        }

        thread::sleep(Duration::from_millis(50));
    }

    pipeline.shutdown();

    let snapshot = pipeline.metrics();
    info!(
        "Run finished after {:.1}s: {} raw samples, {} offsets, {} losses ({} reacquired, {} timed out)",
        started.elapsed().as_secs_f64(),
        snapshot.raw_samples,
        snapshot.offset_updates,
        snapshot.line_lost_events,
        snapshot.recoveries_reacquired,
        snapshot.recoveries_timed_out,
    );
    Ok(())
}

fn run_gains(
    config_path: Option<PathBuf>,
    response: Option<f64>,
    damping: Option<f64>,
) -> Result<()> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(response) = response {
        config.controller.response_factor = response;
    }
    if let Some(damping) = damping {
        config.controller.damping_factor = damping;
    }
    config.validate()?;

    let gains = PdGains::derive(&config.controller);
    println!(
        "max_angle = {:.1} deg, period = {} s, response = {}, damping = {}",
        config.controller.max_steering_angle,
        config.controller.loop_period_s,
        config.controller.response_factor,
        config.controller.damping_factor,
    );
    println!("Kp = {:.3}", gains.kp);
    println!("Kd = {:.4}", gains.kd);
    Ok(())
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trackcar_cli=info".parse().unwrap())
                .add_directive("trackcar_pipeline=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Follow {
            config,
            polarity,
            response,
            duration_s,
        } => run_follow(config, polarity, response, duration_s),

        Commands::Gains {
            config,
            response,
            damping,
        } => run_gains(config, response, damping),
    }
}
