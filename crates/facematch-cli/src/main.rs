mod config;
mod frames;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::reference::extract_face_embedding;
use facematch_core::{
    imaging, FrameOutcome, OnnxRecognizer, Rotation, ScoreReport, ScrfdDetector, Session,
    SessionConfig, SimilarityEngine,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long `run` keeps listening for the last in-flight score after the final frame.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "facematch", about = "Live face similarity against a reference image")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a directory of frames as a camera stream and print scores as JSON lines
    Run {
        /// Reference image (JPEG, PNG, ...)
        #[arg(short, long)]
        reference: PathBuf,
        /// Directory of frames, replayed in file-name order
        #[arg(short, long)]
        frames: PathBuf,
        /// Replay rate in frames per second
        #[arg(long)]
        fps: Option<f64>,
        /// TOML session configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the similarity threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Override the reference rotation (0, 90, 180, 270)
        #[arg(long, allow_hyphen_values = true)]
        rotation: Option<i32>,
        /// Clockwise rotation applied to every frame
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        frame_rotation: i32,
        /// Size of raw .nv21/.yuyv/.gray frames, e.g. 640x480
        #[arg(long, value_parser = frames::parse_size)]
        frame_size: Option<(u32, u32)>,
    },
    /// Score a single probe image against a reference image
    Compare {
        #[arg(short, long)]
        reference: PathBuf,
        #[arg(short, long)]
        probe: PathBuf,
        /// Override the similarity threshold
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Check that the detection and embedding models load
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env();

    match cli.command {
        Commands::Run {
            reference,
            frames,
            fps,
            config: config_path,
            threshold,
            rotation,
            frame_rotation,
            frame_size,
        } => {
            let mut session_config = match config_path {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    SessionConfig::from_toml_str(&text)?
                }
                None => SessionConfig {
                    similarity_threshold: config.similarity_threshold,
                    reference_rotation: config.reference_rotation,
                    ..SessionConfig::default()
                },
            };
            if let Some(threshold) = threshold {
                session_config.similarity_threshold = threshold;
            }
            if let Some(rotation) = rotation {
                session_config.reference_rotation = rotation;
            }
            let session_config = session_config.with_reference_image(read_file(&reference)?);

            let Some(frame_rotation) = Rotation::from_degrees(frame_rotation) else {
                bail!("frame rotation must be a multiple of 90, got {frame_rotation}");
            };
            let replay = Replay {
                dir: frames,
                fps: fps.unwrap_or(config.frame_rate),
                rotation: frame_rotation,
                raw_size: frame_size,
            };
            run(&config, session_config, replay).await?;
        }
        Commands::Compare {
            reference,
            probe,
            threshold,
        } => {
            compare(&config, &reference, &probe, threshold.unwrap_or(config.similarity_threshold))?;
        }
        Commands::Models => models(&config)?,
    }

    Ok(())
}

struct Replay {
    dir: PathBuf,
    fps: f64,
    rotation: Rotation,
    raw_size: Option<(u32, u32)>,
}

async fn run(config: &config::Config, session_config: SessionConfig, replay: Replay) -> Result<()> {
    if !(replay.fps.is_finite() && replay.fps > 0.0) {
        bail!("frame rate must be positive, got {}", replay.fps);
    }
    let paths = frames::list_frames(&replay.dir)?;
    if paths.is_empty() {
        bail!("no frames in {}", replay.dir.display());
    }

    let (detector, recognizer) = load_models(config)?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ScoreReport>();
    let mut session = Session::start(detector, recognizer, tx)?;

    session
        .configure_async(session_config)
        .await
        .context("reference setup failed")?;
    tracing::info!(frames = paths.len(), fps = replay.fps, "replaying frames");

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / replay.fps));
    let mut pending = paths.iter().enumerate();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some((index, path)) = pending.next() else { break };
                let task = frames::load_frame(path, index as u64 + 1, replay.rotation, replay.raw_size)?;
                let disposition = session.submit_frame(task);
                tracing::trace!(path = %path.display(), ?disposition, "frame submitted");
            }
            Some(report) = rx.recv() => print_report(&report)?,
        }
    }

    let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !session.stats().settled() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let stats = session.stats();
    tokio::task::spawn_blocking(move || session.join())
        .await
        .context("pipeline worker join failed")?;
    while let Some(report) = rx.recv().await {
        print_report(&report)?;
    }

    println!("{}", serde_json::to_string(&serde_json::json!({ "stats": stats }))?);
    Ok(())
}

#[derive(Serialize)]
struct ReportLine<'a> {
    sequence: u64,
    #[serde(flatten)]
    outcome: &'a FrameOutcome,
    score: f32,
    elapsed_ms: f64,
}

fn print_report(report: &ScoreReport) -> Result<()> {
    let line = ReportLine {
        sequence: report.sequence,
        outcome: &report.outcome,
        score: report.outcome.legacy_value(),
        elapsed_ms: report.elapsed.as_secs_f64() * 1000.0,
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn compare(config: &config::Config, reference: &Path, probe: &Path, threshold: f32) -> Result<()> {
    let Some(reference_rotation) = Rotation::from_degrees(config.reference_rotation) else {
        bail!("reference rotation must be a multiple of 90, got {}", config.reference_rotation);
    };
    let reference_image = imaging::rotate(imaging::decode(&read_file(reference)?)?, reference_rotation);
    let probe_image = imaging::decode(&read_file(probe)?)?;

    let (mut detector, mut recognizer) = load_models(config)?;
    let reference_embedding = extract_face_embedding(&mut detector, &mut recognizer, &reference_image)
        .context("reference image")?;

    let outcome = match extract_face_embedding(&mut detector, &mut recognizer, &probe_image) {
        Ok(probe_embedding) => SimilarityEngine::new(threshold).evaluate(&probe_embedding, &reference_embedding)?,
        Err(facematch_core::ReferenceError::NoFaceInReference) => FrameOutcome::NoFaceDetected,
        Err(e) => return Err(e).context("probe image"),
    };

    println!(
        "{}",
        serde_json::to_string(&serde_json::json!({
            "outcome": outcome,
            "score": outcome.legacy_value(),
            "threshold": threshold,
        }))?
    );
    Ok(())
}

fn models(config: &config::Config) -> Result<()> {
    let detector_path = config.detector_model_path();
    let embedder_path = config.embedder_model_path();
    println!("Model directory: {}", config.model_dir.display());

    let detector = ScrfdDetector::load(&detector_path);
    match &detector {
        Ok(_) => println!("  detector  OK    {}", detector_path.display()),
        Err(e) => println!("  detector  FAIL  {e}"),
    }
    let recognizer = OnnxRecognizer::load(&embedder_path, config.recognizer_spec());
    match &recognizer {
        Ok(_) => println!(
            "  embedder  OK    {} ({}x{} -> {})",
            embedder_path.display(),
            config.embedder_input,
            config.embedder_input,
            config.embedding_dim
        ),
        Err(e) => println!("  embedder  FAIL  {e}"),
    }

    if detector.is_err() || recognizer.is_err() {
        bail!("one or more models failed to load");
    }
    Ok(())
}

fn load_models(config: &config::Config) -> Result<(ScrfdDetector, OnnxRecognizer)> {
    let detector = ScrfdDetector::load(&config.detector_model_path()).context("loading detector")?;
    let recognizer = OnnxRecognizer::load(&config.embedder_model_path(), config.recognizer_spec())
        .context("loading embedder")?;
    Ok((detector, recognizer))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}
