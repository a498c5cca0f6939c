// src/main.rs

mod calibrate;
mod config;
mod events;
mod geometry;
mod pipeline;
mod speed;
mod tracker;
mod types;
mod violation;

use anyhow::{Context, Result};
use events::EventLog;
use pipeline::FramePipeline;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use types::{Config, FrameDetections};
use walkdir::WalkDir;

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("lane_violation_detection={}", config.logging.level))
        .init();

    info!("Lane Violation Detection starting (site: {})", config.site);
    info!(
        "Tracker: match_thresh={:.2}, track_buffer={}, exclusive_match={}",
        config.tracker.match_thresh, config.tracker.track_buffer, config.tracker.exclusive_match
    );
    info!(
        "Violation: dwell_frames={}, allowed classes: {:?}, auto-clear: {:?}",
        config.violation.dwell_frames,
        config.violation.classes_truck_ok,
        config.violation.clear_after_frames
    );

    let streams = find_detection_streams(&config.io.input_dir)?;
    if streams.is_empty() {
        error!("No detection streams (.jsonl) found in {}", config.io.input_dir);
        return Ok(());
    }
    info!("Found {} detection stream(s) to process", streams.len());

    for (idx, stream_path) in streams.iter().enumerate() {
        info!(
            "Processing stream {}/{}: {}",
            idx + 1,
            streams.len(),
            stream_path.display()
        );

        match process_stream(stream_path, &config) {
            Ok(stats) => {
                info!("Stream processed successfully");
                info!("  Frames: {}", stats.frames);
                info!("  Detections: {}", stats.detections);
                info!("  Violation events: {}", stats.violation_events);
            }
            Err(e) => error!("Failed to process {}: {:#}", stream_path.display(), e),
        }
    }

    Ok(())
}

fn find_detection_streams(input_dir: &str) -> Result<Vec<PathBuf>> {
    let mut streams = Vec::new();

    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            streams.push(path.to_path_buf());
        }
    }

    streams.sort();
    Ok(streams)
}

fn process_stream(path: &Path, config: &Config) -> Result<pipeline::PipelineStats> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("stream");
    let event_path =
        Path::new(&config.io.output_dir).join(format!("{}_{}_events.jsonl", config.site, stem));
    let event_log = EventLog::create(&event_path)?;

    let mut pipeline = FramePipeline::new(config, Some(event_log))?;

    let file =
        File::open(path).with_context(|| format!("opening stream {}", path.display()))?;
    let reader = BufReader::new(file);

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: FrameDetections = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping bad line {} in {}: {}", line_num + 1, path.display(), e);
                continue;
            }
        };

        pipeline.process_frame(&frame.detections)?;

        let stats = pipeline.stats();
        if stats.frames % 300 == 0 {
            info!(
                "Frame {}: {} violation event(s) so far",
                stats.frames, stats.violation_events
            );
        }
    }

    Ok(pipeline.stats())
}
