use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use setup_core::{
    views, HttpMeterApi, MeterStore, SegmentationUpdate, SetupCoordinator, SetupEvent,
    ThresholdUpdate,
};
use shared::{
    domain::{EvaluationId, MeterId},
    protocol::DigitSample,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_config;

#[derive(Parser, Debug)]
#[command(name = "meter-setup", about = "Tune digit detection for a water meter")]
struct Cli {
    /// Meter name as registered with the server
    #[arg(long)]
    meter: String,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    secret: Option<String>,
    /// Config file, defaults to ./meter-setup.toml
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh and print device, current evaluation and settings
    Show,
    /// Load the confirmation sample batch
    Samples {
        #[arg(long)]
        amount: Option<u32>,
        /// Write every decoded digit crop into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    Thresholds {
        #[arg(long)]
        low: Option<i32>,
        #[arg(long)]
        high: Option<i32>,
        #[arg(long)]
        last_low: Option<i32>,
        #[arg(long)]
        last_high: Option<i32>,
        #[arg(long)]
        padding: Option<i32>,
    },
    Segmentation {
        #[arg(long)]
        segments: Option<u32>,
        #[arg(long)]
        extended_last_digit: Option<bool>,
        #[arg(long)]
        narrow_last_3: Option<bool>,
        #[arg(long)]
        rotated_180: Option<bool>,
    },
    MaxFlow {
        value: f64,
    },
    Reevaluate,
    /// Re-segment a random capture onto the current evaluation
    Redo,
    /// Page through stored evaluations, newest first
    Evals {
        #[arg(long, default_value_t = 5)]
        amount: u32,
        #[arg(long)]
        from_id: Option<i64>,
    },
    History,
    /// Save the latest captured picture
    Picture {
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, config_diagnostic) = load_config(cli.config.as_deref());
    if let Some(server_url) = cli.server_url.clone() {
        config.server_url = server_url;
    }
    if let Some(secret) = cli.secret.clone() {
        config.secret = Some(secret);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();
    if let Some(message) = config_diagnostic {
        warn!("{message}");
    }

    let api = Arc::new(
        HttpMeterApi::new(&config.server_url, config.secret.clone())
            .with_context(|| format!("invalid server url '{}'", config.server_url))?,
    );
    let store = Arc::new(MeterStore::new(api.clone()).with_history(config.fetch_history));
    let coordinator = Arc::new(
        SetupCoordinator::new(store.clone(), api).with_sample_amount(config.sample_amount),
    );
    let id = MeterId::new(cli.meter);

    let mut events = coordinator.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SetupEvent::SampleAppended { offset, sample } => {
                    info!(offset, reading = %sample.reading(), "sample loaded")
                }
                SetupEvent::BoundingBoxChecked { found: false } => {
                    warn!("display bounding box not found; check rotation and framing")
                }
                SetupEvent::Error(message) => warn!("{message}"),
                _ => {}
            }
        }
    });

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                coordinator.cancel_ongoing_load().await;
            }
        });
    }

    match cli.command {
        Command::Show => {
            coordinator
                .get_data(&id)
                .await
                .context("failed to load meter data")?;
            let snapshot = store.snapshot().await;
            if let Some(picture) = &snapshot.last_picture {
                println!(
                    "meter {} picture #{} ({}x{} {}, rssi {})",
                    picture.name,
                    picture.picture_number,
                    picture.picture.width,
                    picture.picture.height,
                    picture.picture.format,
                    picture.wifi_rssi
                );
            }
            match &snapshot.current_evaluation {
                Some(eval) => println!(
                    "current evaluation {} reads {} (value {:?}, confidence {:?})",
                    eval.id.0,
                    eval.reading(),
                    eval.value,
                    eval.confidence
                ),
                None => println!("no evaluations stored yet"),
            }
            print_settings(&store).await;
        }
        Command::Samples { amount, out_dir } => {
            store.fetch_settings(&id).await?;
            coordinator
                .request_samples(&id, amount.unwrap_or(config.sample_amount))
                .await;
            report_samples(&coordinator, out_dir.as_deref()).await?;
        }
        Command::Thresholds {
            low,
            high,
            last_low,
            last_high,
            padding,
        } => {
            store.fetch_settings(&id).await?;
            let (cur_low, cur_high) = store.read(views::THRESHOLD).await;
            let (cur_last_low, cur_last_high) = store.read(views::THRESHOLD_LAST).await;
            let update = ThresholdUpdate {
                threshold: (low.unwrap_or(cur_low), high.unwrap_or(cur_high)),
                threshold_last: (
                    last_low.unwrap_or(cur_last_low),
                    last_high.unwrap_or(cur_last_high),
                ),
                islanding_padding: match padding {
                    Some(padding) => padding,
                    None => store.read(views::ISLANDING_PADDING).await,
                },
            };
            if update.threshold.0 > update.threshold.1
                || update.threshold_last.0 > update.threshold_last.1
            {
                warn!(?update, "low threshold is above high threshold");
            }
            coordinator
                .update_thresholds(update, &id)
                .await
                .context("failed to store thresholds")?;
            report_samples(&coordinator, None).await?;
        }
        Command::Segmentation {
            segments,
            extended_last_digit,
            narrow_last_3,
            rotated_180,
        } => {
            store.fetch_settings(&id).await?;
            let current = store.settings().await;
            let update = SegmentationUpdate {
                segments: segments.unwrap_or(current.segments),
                extended_last_digit: extended_last_digit.unwrap_or(current.extended_last_digit),
                last_3_digits_narrow: narrow_last_3.unwrap_or(current.shrink_last_3),
                rotated_180: rotated_180.unwrap_or(current.rotated_180),
            };
            coordinator
                .update_segmentation(update, &id)
                .await
                .context("failed to store segmentation")?;
            report_bounding_box(&coordinator).await;
            report_samples(&coordinator, None).await?;
        }
        Command::MaxFlow { value } => {
            store.fetch_settings(&id).await?;
            coordinator
                .update_max_flow(value, &id)
                .await
                .context("failed to store max flow rate")?;
            println!("max flow rate set to {value}");
        }
        Command::Reevaluate => {
            coordinator.reevaluate(&id).await;
            report_bounding_box(&coordinator).await;
            report_samples(&coordinator, None).await?;
        }
        Command::Redo => {
            store.fetch_evaluations(&id, 1, None).await?;
            coordinator.redo_digit_eval(&id).await;
            match store.current_evaluation().await {
                Some(eval) => println!("evaluation {} now reads {}", eval.id.0, eval.reading()),
                None => println!("no evaluation to update"),
            }
        }
        Command::Evals { amount, from_id } => {
            let page = store
                .fetch_evaluations(&id, amount, from_id.map(EvaluationId))
                .await?;
            for eval in page {
                println!(
                    "{:>6}  {}  {}",
                    eval.id.0,
                    eval.timestamp.as_deref().unwrap_or("-"),
                    eval.reading()
                );
            }
        }
        Command::History => {
            for entry in store.fetch_history(&id).await? {
                println!(
                    "{}  {:>10}  {}{}",
                    entry.timestamp,
                    entry.value,
                    entry
                        .confidence
                        .map(|c| format!("{c:.2}"))
                        .unwrap_or_else(|| "-".into()),
                    if entry.manual { "  (manual)" } else { "" }
                );
            }
        }
        Command::Picture { out } => {
            let snapshot = store.fetch_device(&id).await?;
            let bytes = STANDARD
                .decode(snapshot.picture.data.as_bytes())
                .context("picture payload is not valid base64")?;
            fs::write(&out, bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("saved picture #{} to {}", snapshot.picture_number, out.display());
        }
    }

    Ok(())
}

async fn print_settings(store: &MeterStore) {
    let settings = store.settings().await;
    println!(
        "threshold {:?}  last digit {:?}  padding {}",
        views::THRESHOLD.read(&settings),
        views::THRESHOLD_LAST.read(&settings),
        settings.islanding_padding
    );
    println!(
        "segments {}  extended last {}  narrow last 3 {}  rotated {}  max flow {}",
        settings.segments,
        settings.extended_last_digit,
        settings.shrink_last_3,
        settings.rotated_180,
        settings.max_flow_rate
    );
}

async fn report_bounding_box(coordinator: &SetupCoordinator) {
    if coordinator.snapshot().await.no_bounding_box {
        println!("no display bounding box found");
    }
}

async fn report_samples(coordinator: &SetupCoordinator, out_dir: Option<&Path>) -> Result<()> {
    let samples = coordinator.snapshot().await.samples;
    if samples.is_empty() {
        println!("no samples loaded");
        return Ok(());
    }
    for (offset, sample) in samples.iter().enumerate() {
        println!("sample {offset:>2}: {}", sample.reading());
        if let Some(dir) = out_dir {
            write_digit_crops(dir, offset, sample)?;
        }
    }
    Ok(())
}

fn write_digit_crops(dir: &Path, offset: usize, sample: &DigitSample) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (position, encoded) in sample.processed_images.iter().enumerate() {
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .with_context(|| format!("digit {position} of sample {offset} is not valid base64"))?;
        let path = dir.join(format!("sample-{offset:02}-digit-{position}.png"));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
