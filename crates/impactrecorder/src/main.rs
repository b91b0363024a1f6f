//! `impactrec` - CLI for impactrecorder
//!
//! Runs the crash detection pipeline over recorded sensor logs and inspects
//! the evidence it stored.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

use impactrecorder::audio::UnavailableCapture;
use impactrecorder::cli::{Cli, Command, ConfigCommand, ListCommand, RunCommand};
use impactrecorder::{
    init_logging, AudioCapture, Axis, CaptureCoordinator, Config, CrashDetector,
    EvidenceUploader, FixedLocation, LocationProvider, NoLocation, Pipeline, ReplaySource,
    RollingAudioBuffer, SensorKind, SqliteBackend, Status, StatusPublisher, UploadStatus,
    WavFileCapture,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    match cli.command {
        Command::Run(run_cmd) => handle_run(&load_config(cli.config)?, run_cmd).await,
        Command::Status(status_cmd) => handle_status(&load_config(cli.config)?, status_cmd.json),
        Command::List(list_cmd) => handle_list(&load_config(cli.config)?, &list_cmd),
        // Config commands report load errors themselves.
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("loading configuration")
}

async fn handle_run(config: &Config, cmd: RunCommand) -> anyhow::Result<()> {
    let motion = ReplaySource::load(&cmd.samples, SensorKind::Acceleration)
        .context("loading acceleration log")?
        .realtime(!cmd.fast);

    // Gravity readings may share the acceleration log.
    let gravity_path = cmd.gravity.as_ref().unwrap_or(&cmd.samples);
    let gravity = ReplaySource::load(gravity_path, SensorKind::Gravity)
        .context("loading gravity log")?
        .realtime(!cmd.fast);

    let capture: Box<dyn AudioCapture> = match cmd.audio.or_else(|| config.audio.source.clone()) {
        Some(path) => Box::new(WavFileCapture::new(path)),
        None => Box::new(UnavailableCapture::new("no audio source configured")),
    };
    let location: Arc<dyn LocationProvider> = match config.fixed_location() {
        Some(location) => Arc::new(FixedLocation(location)),
        None => Arc::new(NoLocation),
    };

    let backend = Arc::new(
        SqliteBackend::open(config.database_path(), config.blob_dir())
            .context("opening evidence storage")?,
    );
    let status = StatusPublisher::new();
    let uploader = Arc::new(EvidenceUploader::new(
        backend,
        status.clone(),
        config.upload.table.clone(),
        config.status_display(),
    ));
    let buffer = RollingAudioBuffer::new(
        capture,
        config.audio.window_chunks,
        config.chunk_duration(),
    );
    let coordinator = CaptureCoordinator::new(
        buffer,
        location,
        uploader,
        status.clone(),
        config.location_timeout(),
    );

    let mut pipeline = Pipeline::new(
        CrashDetector::new(config.detector.clone()),
        coordinator,
        status,
        Box::new(motion),
    );
    if !gravity.is_empty() {
        pipeline = pipeline.with_gravity(Box::new(gravity));
    }

    let display = tokio::spawn(display_status(pipeline.status()));
    let report = pipeline
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    display.abort();

    println!();
    println!("Samples evaluated: {}", report.samples);
    println!("Crashes captured:  {}", report.crashes);
    println!("Crashes coalesced: {}", report.coalesced);
    for upload in &report.uploads {
        match (&upload.remote_url, &upload.error) {
            (Some(url), _) => println!("  stored  {url}"),
            (None, Some(error)) => println!("  failed  {error}"),
            (None, None) => println!("  pending"),
        }
    }
    Ok(())
}

/// Print status transitions as they are published.
async fn display_status(mut rx: watch::Receiver<Status>) {
    let mut shown = rx.borrow_and_update().clone();
    while rx.changed().await.is_ok() {
        let current = rx.borrow_and_update().clone();

        if current.recording != shown.recording || current.capture_error != shown.capture_error {
            match (current.recording, &current.capture_error) {
                (true, _) => println!("Recording"),
                (false, Some(error)) => println!("Not recording: {error}"),
                (false, None) => println!("Not recording"),
            }
        }
        if current.alarm != shown.alarm {
            if let Some(alarm) = &current.alarm {
                println!("ALARM: {alarm}");
            }
        }
        if current.upload != shown.upload && current.upload != UploadStatus::Neutral {
            println!("{}", current.upload);
        }

        shown = current;
    }
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let backend = SqliteBackend::open(config.database_path(), config.blob_dir())?;
    let stats = backend.stats(&config.upload.table)?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "blob_dir": config.blob_dir(),
            "table": config.upload.table,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("impactrec status");
        println!("----------------");
        println!("Database:      {}", config.database_path().display());
        println!("Blobs:         {}", config.blob_dir().display());
        println!("Table:         {}", config.upload.table);
        println!("Evidence:      {}", stats.total_evidence);
        println!("Audio bytes:   {}", stats.blob_bytes);
        if let Some(oldest) = stats.oldest_capture {
            println!("Oldest:        {}", oldest.to_rfc3339());
        }
        if let Some(newest) = stats.newest_capture {
            println!("Newest:        {}", newest.to_rfc3339());
        }
    }
    Ok(())
}

fn handle_list(config: &Config, cmd: &ListCommand) -> anyhow::Result<()> {
    let backend = SqliteBackend::open(config.database_path(), config.blob_dir())?;
    let records = backend.recent(&config.upload.table, cmd.last)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No evidence stored.");
        return Ok(());
    }
    for record in records {
        let location = match (record.latitude, record.longitude) {
            (Some(lat), Some(lon)) => format!("{lat:.5}, {lon:.5}"),
            _ => "unknown".to_string(),
        };
        println!(
            "{}  {:>3} chunks  {:>9} bytes  {}  {}",
            record.captured_at.format("%Y-%m-%d %H:%M:%S"),
            record.chunk_count,
            record.byte_len,
            location,
            record.url
        );
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                let axes: Vec<String> = Axis::ALL
                    .iter()
                    .filter(|axis| config.monitors_axis(**axis))
                    .map(ToString::to_string)
                    .collect();

                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Detector]");
                println!("  Threshold:          {}", config.detector.threshold);
                println!("  Axes:               {}", axes.join(", "));
                println!();
                println!("[Audio]");
                println!("  Chunk (ms):         {}", config.audio.chunk_duration_ms);
                println!("  Window (chunks):    {}", config.audio.window_chunks);
                match &config.audio.source {
                    Some(path) => println!("  Source:             {}", path.display()),
                    None => println!("  Source:             (none)"),
                }
                println!();
                println!("[Location]");
                println!("  Timeout (ms):       {}", config.location.timeout_ms);
                match config.fixed_location() {
                    Some(location) => println!("  Fixed:              {location}"),
                    None => println!("  Fixed:              (none)"),
                }
                println!();
                println!("[Upload]");
                println!("  Table:              {}", config.upload.table);
                println!("  Status shown (s):   {}", config.upload.status_display_secs);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Blob directory:     {}", config.blob_dir().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
