//! gate_monitor - Watch a gate through a camera and report it over MQTT.
//!
//! Startup:
//! 1. Load configuration (missing required keys exit non-zero)
//! 2. Select a vision model and load the reference images
//! 3. Connect to the broker and announce `online`
//! 4. Poll every `check_interval_minutes` until Ctrl-C / SIGTERM
//!
//! `--once` runs a single check; `--list-models` prints usable models and exits.
//! `rtsp://` cameras need the `rtsp-gstreamer` feature.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use gate_monitor::classify::{find_best_model, vision_models, RetryPolicy, RATE_LIMIT_BACKOFF};
use gate_monitor::{
    GateClassifier, GateMonitorConfig, GeminiClient, Monitor, MonitorSettings, MqttPublisher,
    MqttSettings, ReferenceSet, RtspConfig, RtspSource, RunState, SnapshotStore, Topics,
    VisionOracle,
};

const CLIENT_ID_PREFIX: &str = "gate_monitor";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Classify a gate as open/closed from a camera and publish to MQTT",
    after_help = "rtsp:// camera URLs need a build with `--features rtsp-gstreamer`; \
                  default builds accept http(s):// snapshot URLs."
)]
struct Args {
    /// Path to the JSON options file.
    #[arg(
        long,
        env = "GATE_MONITOR_CONFIG",
        default_value = gate_monitor::config::DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Run a single gate check, then shut down.
    #[arg(long)]
    once: bool,

    /// Print the vision models available to the API key and exit.
    #[arg(long)]
    list_models: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!("gate monitor starting");
    let cfg = GateMonitorConfig::load(&args.config)?;
    log::info!("camera: {}", cfg.camera_name);
    log::info!(
        "check interval: {} minutes",
        cfg.check_interval.as_secs_f64() / 60.0
    );
    log::info!("confidence threshold: {}%", cfg.confidence_threshold);

    let oracle = GeminiClient::new(&cfg.gemini_api_key, cfg.request_timeout);

    if args.list_models {
        let raw = oracle
            .list_models()
            .map_err(|e| anyhow!("failed to list models: {}", e))?;
        for name in vision_models(&raw) {
            println!("{}", name);
        }
        return Ok(());
    }

    let model = find_best_model(&oracle).context("could not find a suitable vision model")?;
    log::info!("using model: {}", model);

    let references = ReferenceSet::load(&cfg.reference_dir);

    let source = RtspSource::new(RtspConfig {
        url: cfg.rtsp_url.clone(),
        crop: cfg.gate_crop,
        timeout: cfg.request_timeout,
    })?;

    let run_state = Arc::new(RunState::new());
    let signal_state = run_state.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        signal_state.request_shutdown();
    })
    .context("error setting Ctrl-C handler")?;

    let classifier = GateClassifier::new(oracle, model, references, cfg.confidence_threshold)
        .with_retry(RetryPolicy {
            max_attempts: cfg.max_retries,
            backoff: RATE_LIMIT_BACKOFF,
        })
        .with_sleeper(run_state.clone());

    let topics = Topics::new(&cfg.mqtt.topic_prefix, &cfg.camera_name);
    let publisher = MqttPublisher::connect(
        &MqttSettings {
            broker: cfg.mqtt.broker.clone(),
            port: cfg.mqtt.port,
            username: cfg.mqtt.username.clone(),
            password: cfg.mqtt.password.clone(),
            client_id: format!("{}_{}", CLIENT_ID_PREFIX, cfg.camera_name),
            discovery_prefix: cfg.ha_discovery_prefix.clone(),
        },
        topics,
    );

    let mut monitor = Monitor::new(
        MonitorSettings {
            camera_name: cfg.camera_name.clone(),
            check_interval: cfg.check_interval,
            startup_delay: cfg.startup_delay,
        },
        source,
        classifier,
        publisher,
        SnapshotStore::new(&cfg.snapshot_dir, &cfg.snapshot_url_prefix),
    );

    if args.once {
        monitor.run_once();
    } else {
        monitor.run(&run_state);
    }
    Ok(())
}
