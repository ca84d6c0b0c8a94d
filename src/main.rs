// src/main.rs

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use traffic_violation_detection::pipeline::{LiveSettings, MetricsSummary};
use traffic_violation_detection::vehicle_detection::YoloDetector;
use traffic_violation_detection::video_processor::{self, FrameSource, ImageSequenceSource};
use traffic_violation_detection::{
    Config, Engine, NullRecognizer, PlateRecognizer, RunSummary, SessionConfig, SessionObserver,
    ViolationRecord,
};

/// Streams every violation to `<name>_violations.jsonl` as it is found.
struct JsonlViolationWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlViolationWriter {
    fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

impl SessionObserver for JsonlViolationWriter {
    fn on_violation(&mut self, record: &ViolationRecord) {
        if !record.is_violation {
            return;
        }
        let written = serde_json::to_string(record)
            .map_err(anyhow::Error::from)
            .and_then(|line| writeln!(self.writer, "{}", line).map_err(anyhow::Error::from))
            .and_then(|_| self.writer.flush().map_err(anyhow::Error::from));
        if let Err(e) = written {
            warn!("Failed to append to {}: {:#}", self.path.display(), e);
        }
    }
}

#[derive(Serialize)]
struct ExecutionReport<'a> {
    input: String,
    summary: &'a RunSummary,
    realtime_factor: f64,
    settings: LiveSettings,
    metrics: MetricsSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load("config.yaml").context("failed to load config.yaml")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "traffic_violation_detection={},ort=warn",
            config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚦 Traffic Violation Detection Starting");
    info!(
        "Session defaults: speed_limit={:.0} km/h, frame_skip={}, confidence={:.2}",
        config.violation.speed_limit_kmh,
        config.detection.frame_skip,
        config.detection.confidence_threshold
    );

    let detector = YoloDetector::new(&config.model.path, config.model.input_size)?;
    let recognizer = NullRecognizer;
    warn!(
        "No plate recognizer configured (recognizer: {}); plate_text will be empty in every record",
        recognizer.name()
    );
    let engine = Engine::new(Box::new(detector), Box::new(recognizer))
        .with_fallback_fps(config.video.fallback_fps);
    info!("✓ Engine ready");

    if config.video.save_annotated && !cfg!(feature = "video") {
        warn!(
            "video.save_annotated is set but this build lacks the `video` feature; \
             no annotated output"
        );
    }

    let inputs = discover_inputs(&config);
    if inputs.is_empty() {
        error!("No inputs found in {}", config.video.input_dir);
        return Ok(());
    }

    std::fs::create_dir_all(&config.video.output_dir)?;
    let session_config = SessionConfig::from(&config);

    for (idx, (name, source)) in inputs.into_iter().enumerate() {
        info!("========================================");
        info!("Processing input {}: {}", idx + 1, source.describe());
        info!("========================================");

        let output_dir = Path::new(&config.video.output_dir);
        let writer = JsonlViolationWriter::create(
            output_dir.join(format!("{}_violations.jsonl", name)),
        )?;
        let mut observers: Vec<Box<dyn SessionObserver>> = vec![Box::new(writer)];
        if let Some(annotated) = annotated_writer(&config, output_dir, &name) {
            observers.push(annotated);
        }

        let handle = engine.start_session(source, session_config, Some(Box::new(observers)))?;
        let summary = match handle.wait().await {
            Ok(summary) => summary,
            Err(e) => {
                error!("❌ {} failed: {}", name, e);
                continue;
            }
        };

        info!("✓ {} processed ({:?})", name, summary.final_state);
        info!("  Total frames: {}", summary.total_frames);
        info!("  Violations: {}", summary.violation_count);
        info!(
            "  Elapsed: {:.1}s ({:.2}x real time)",
            summary.elapsed_secs,
            summary.realtime_factor()
        );

        let report = ExecutionReport {
            input: name.clone(),
            summary: &summary,
            realtime_factor: summary.realtime_factor(),
            settings: engine.settings(),
            metrics: engine.metrics(),
        };
        let report_path = output_dir.join(format!("{}_execution_results.json", name));
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
        info!("💾 Results written to {}", report_path.display());
    }

    Ok(())
}

fn input_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input")
        .to_string()
}

#[cfg(feature = "video")]
fn annotated_writer(
    config: &Config,
    output_dir: &Path,
    name: &str,
) -> Option<Box<dyn SessionObserver>> {
    use traffic_violation_detection::video_processor::AnnotatedVideoWriter;

    config.video.save_annotated.then(|| {
        let path = output_dir.join(format!("{}_annotated.mp4", name));
        Box::new(AnnotatedVideoWriter::new(path)) as Box<dyn SessionObserver>
    })
}

#[cfg(not(feature = "video"))]
fn annotated_writer(
    _config: &Config,
    _output_dir: &Path,
    _name: &str,
) -> Option<Box<dyn SessionObserver>> {
    None
}

#[cfg(feature = "video")]
fn discover_inputs(config: &Config) -> Vec<(String, Box<dyn FrameSource>)> {
    use traffic_violation_detection::video_processor::VideoFileSource;

    let input_dir = Path::new(&config.video.input_dir);
    let mut inputs: Vec<(String, Box<dyn FrameSource>)> = video_processor::find_video_files(input_dir)
        .into_iter()
        .map(|path| {
            let source: Box<dyn FrameSource> = Box::new(VideoFileSource::new(&path));
            (input_name(&path), source)
        })
        .collect();
    inputs.extend(image_sequence_inputs(config));
    inputs
}

#[cfg(not(feature = "video"))]
fn discover_inputs(config: &Config) -> Vec<(String, Box<dyn FrameSource>)> {
    image_sequence_inputs(config)
}

fn image_sequence_inputs(config: &Config) -> Vec<(String, Box<dyn FrameSource>)> {
    let fps = config.video.image_sequence_fps;
    video_processor::find_image_sequences(Path::new(&config.video.input_dir))
        .into_iter()
        .map(|dir| {
            let source: Box<dyn FrameSource> = Box::new(ImageSequenceSource::new(&dir, fps));
            (input_name(&dir), source)
        })
        .collect()
}
