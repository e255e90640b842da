use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use trailscout_detect::ocr::Ocr;
use trailscout_detect::SpeciesModel;

use crate::sink::{CsvSink, LogRecord, LogSink};

mod pipeline;
mod sink;
mod species;
mod timestamp;

#[derive(clap::Parser)]
#[command(name = "trailscout", about = "Identifies animal species in trail-camera clips")]
struct Cli {
    /// ONNX species detection model
    #[arg(long, default_value = "models/best.onnx")]
    model: PathBuf,

    /// JSON array mapping class indices to species labels
    #[arg(long, default_value = "models/labels.json")]
    labels: PathBuf,

    /// rten text-detection model for reading burned-in timestamps
    #[arg(long)]
    ocr_detect: Option<PathBuf>,

    /// rten text-recognition model for reading burned-in timestamps
    #[arg(long)]
    ocr_rec: Option<PathBuf>,

    /// Detection log; one CSV row per clip with an animal in it
    #[arg(long, default_value = "detections.csv")]
    log: PathBuf,

    /// Skip writing the detection log
    #[arg(long)]
    no_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Analyze a single clip
    Analyze {
        video: PathBuf,
        /// Print the log record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Analyze every clip in a folder
    Batch { folder: PathBuf },
    /// Recover only a clip's timestamp
    Timestamp { video: PathBuf },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trailscout=info")),
        )
        .init();
    trailscout_io::init().context("ffmpeg init failed")?;

    let cli = Cli::parse();
    let ocr = load_ocr(&cli);

    match &cli.command {
        Command::Analyze { video, json } => {
            let mut detector = SpeciesModel::new(&cli.model, &cli.labels)?;
            match pipeline::process_video(video, &mut detector)? {
                Some(best) => {
                    let stamp = timestamp::get_timestamp(video, ocr.as_ref());
                    let file_name = video
                        .file_name()
                        .and_then(|name| name.to_str())
                        .unwrap_or_default();
                    let record = LogRecord::new(&stamp, &best, file_name);
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    } else {
                        println!(
                            "{} detected ({:.2}% confidence)",
                            best.species,
                            best.confidence * 100.0
                        );
                        println!(
                            "timestamp: {} {} ({})",
                            stamp.date, stamp.time, stamp.provenance
                        );
                    }
                    if !cli.no_log {
                        let mut sink = CsvSink::new(cli.log.clone());
                        if let Err(e) = sink.append(&record) {
                            tracing::warn!("failed to log {file_name}: {e}");
                        }
                    }
                }
                None => println!("No animals found."),
            }
        }
        Command::Batch { folder } => {
            let mut detector = SpeciesModel::new(&cli.model, &cli.labels)?;
            let mut csv;
            let sink: Option<&mut dyn LogSink> = if cli.no_log {
                None
            } else {
                csv = CsvSink::new(cli.log.clone());
                Some(&mut csv)
            };
            let summary = pipeline::process_folder(folder, &mut detector, ocr.as_ref(), sink)?;
            println!(
                "Processed {} videos. Found animals in {} of them.",
                summary.processed, summary.logged
            );
        }
        Command::Timestamp { video } => {
            let stamp = timestamp::get_timestamp(video, ocr.as_ref());
            println!("{} {} ({})", stamp.date, stamp.time, stamp.provenance);
        }
    }

    Ok(())
}

/// The OCR engine is optional: without its models the timestamp chain just
/// starts at file metadata.
fn load_ocr(cli: &Cli) -> Option<Ocr> {
    match (&cli.ocr_detect, &cli.ocr_rec) {
        (Some(detect), Some(rec)) => match Ocr::new(detect, rec) {
            Ok(ocr) => Some(ocr),
            Err(e) => {
                tracing::warn!("burned-in timestamp reading disabled: {e}");
                None
            }
        },
        (None, None) => {
            tracing::debug!("no OCR models configured; timestamps will come from file metadata");
            None
        }
        _ => {
            tracing::warn!(
                "both --ocr-detect and --ocr-rec are needed to read burned-in timestamps"
            );
            None
        }
    }
}
