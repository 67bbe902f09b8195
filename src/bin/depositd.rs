//! depositd - waste receptacle deposit detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by DEPOSIT_CONFIG plus environment overrides)
//! 2. Opens the configured frame source (camera, image sequence or synthetic scene)
//! 3. Loads the classifier and label table
//! 4. Runs the deposit pipeline until the stream ends or Ctrl-C
//! 5. Delivers each deposit event to the log, a JSON-lines file and optionally HTTP

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use deposit_kernel::config::{ClassifierSettings, DepositdConfig, OutputSettings};
use deposit_kernel::ingest::SourceStats;
use deposit_kernel::{
    open_source, ClassificationHandoff, Classifier, DepositPipeline, FanoutSink, Frame,
    FrameSource, JsonLinesSink, LabelTable, LogSink, StubClassifier,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect and classify deposits into a waste receptacle")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "DEPOSIT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the frame source url.
    #[arg(long, value_name = "URL")]
    source: Option<String>,
    /// Override the JSON-lines event output path.
    #[arg(long, value_name = "PATH")]
    events: Option<PathBuf>,
    /// Run one classifier pass on a blank input before starting.
    #[arg(long)]
    warm_up: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DepositdConfig::load_from(args.config.as_deref())?;
    if let Some(url) = args.source {
        cfg.source.url = url;
    }
    if let Some(path) = args.events {
        cfg.output.events_path = Some(path);
    }

    let (classifier, labels) = build_classifier(&cfg.classifier)?;
    log::info!(
        "classifier '{}' with {} label(s)",
        classifier.name(),
        labels.len()
    );
    let mut handoff = ClassificationHandoff::new(classifier, labels)?;
    if args.warm_up {
        handoff.warm_up().context("classifier warm-up failed")?;
    }

    let mut pipeline = DepositPipeline::new(cfg.pipeline.clone(), handoff)?;
    let mut sink = build_sinks(&cfg.output)?;

    let mut source = HealthLogged::new(open_source(&cfg.source)?);
    source.connect()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "depositd running. source={} settle={:?} required_frames={}",
        cfg.source.url,
        cfg.pipeline.settle_duration,
        cfg.pipeline.detection_required_frames
    );

    let summary = pipeline.run(&mut source, &mut sink, &stop)?;
    log::info!(
        "depositd stopped: frames={} skipped={} deposits={} classification_failures={} delivery_failures={}",
        summary.frames_processed,
        summary.frames_skipped,
        summary.deposits,
        summary.classification_failures,
        summary.delivery_failures
    );
    Ok(())
}

fn build_classifier(settings: &ClassifierSettings) -> Result<(Box<dyn Classifier>, LabelTable)> {
    match &settings.model_path {
        Some(path) => Ok((load_model(path, settings.input_size)?, settings.label_table()?)),
        None => {
            log::warn!("no classifier model configured; every deposit will be labeled Unknown");
            Ok((Box::new(StubClassifier::fixed(0)), LabelTable::default()))
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &std::path::Path, input_size: u32) -> Result<Box<dyn Classifier>> {
    let classifier = deposit_kernel::classify::TractClassifier::imagenet(path, input_size)?;
    Ok(Box::new(classifier))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &std::path::Path, _input_size: u32) -> Result<Box<dyn Classifier>> {
    Err(anyhow!(
        "model {} requires the backend-tract feature",
        path.display()
    ))
}

fn build_sinks(output: &OutputSettings) -> Result<FanoutSink> {
    let mut sink = FanoutSink::new().with(LogSink);
    if let Some(path) = &output.events_path {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        sink.push(JsonLinesSink::new(BufWriter::new(file)));
        log::info!("writing deposit events to {}", path.display());
    }
    if let Some(endpoint) = &output.http_endpoint {
        add_http_sink(&mut sink, endpoint)?;
    }
    Ok(sink)
}

#[cfg(feature = "sink-http")]
fn add_http_sink(sink: &mut FanoutSink, endpoint: &str) -> Result<()> {
    sink.push(deposit_kernel::sink::HttpSink::new(endpoint));
    log::info!("posting deposit events to {}", endpoint);
    Ok(())
}

#[cfg(not(feature = "sink-http"))]
fn add_http_sink(_sink: &mut FanoutSink, endpoint: &str) -> Result<()> {
    Err(anyhow!(
        "http endpoint {} requires the sink-http feature",
        endpoint
    ))
}

/// Source wrapper that logs health and frame counters periodically.
struct HealthLogged<S> {
    inner: S,
    last_log: Instant,
}

impl<S: FrameSource> HealthLogged<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            last_log: Instant::now(),
        }
    }
}

impl<S: FrameSource> FrameSource for HealthLogged<S> {
    fn connect(&mut self) -> deposit_kernel::Result<()> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> deposit_kernel::Result<Option<Frame>> {
        let frame = self.inner.next_frame();
        if self.last_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = self.inner.stats();
            log::info!(
                "source health={} frames={} rejected={} source={}",
                self.inner.is_healthy(),
                stats.frames_captured,
                stats.frames_rejected,
                stats.source
            );
            self.last_log = Instant::now();
        }
        frame
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}
