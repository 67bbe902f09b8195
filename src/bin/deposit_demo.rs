//! deposit_demo - end-to-end synthetic run of the deposit pipeline
//!
//! Renders a scripted scene, runs it through the pipeline with the stub
//! classifier and prints every deposit event as one JSON line on stdout.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use deposit_kernel::{
    ClassificationHandoff, DepositPipeline, FanoutSink, FrameSource, JsonLinesSink, LabelTable,
    LogSink, PipelineConfig, SourceSettings, StubClassifier, SyntheticConfig, SyntheticSource,
};

const DEMO_CATEGORIES: [&str; 8] = [
    "Non-recyclable",
    "Glass",
    "Paper",
    "Organic",
    "Metal",
    "Plastic",
    "Cardboard",
    "Recyclable",
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Scene to render: empty, deposit, pair, revisit or passthrough.
    #[arg(long, default_value = "deposit")]
    scene: String,
    /// Frames per second of the synthetic stream.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    #[arg(long, default_value_t = 320)]
    width: u32,
    #[arg(long, default_value_t = 240)]
    height: u32,
    /// Uniform pixel noise amplitude.
    #[arg(long, default_value_t = 0)]
    noise: u8,
    /// Seed for the noise generator.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Quiet time after motion before background analysis, in seconds.
    #[arg(long, default_value_t = 1.0)]
    settle_secs: f64,
    /// Save each confirmed crop here as PNG.
    #[arg(long)]
    roi_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let settings = SourceSettings {
        url: format!("stub://{}", args.scene),
        target_fps: args.fps,
        width: args.width,
        height: args.height,
    };
    let mut scene = SyntheticConfig::scene(&args.scene, &settings)?;
    scene.noise = args.noise;
    scene.seed = args.seed;
    let mut source = SyntheticSource::new(scene);
    source.connect()?;

    let settle_duration = std::time::Duration::try_from_secs_f64(args.settle_secs)
        .map_err(|_| anyhow!("settle-secs must be a non-negative number"))?;
    let config = PipelineConfig {
        settle_duration,
        roi_dir: args.roi_dir,
        ..PipelineConfig::default()
    };
    let handoff = ClassificationHandoff::new(
        Box::new(StubClassifier::intensity_bins(DEMO_CATEGORIES.len())),
        LabelTable::from_categories(DEMO_CATEGORIES),
    )?;
    let mut pipeline = DepositPipeline::new(config, handoff)?;

    let mut sink = FanoutSink::new()
        .with(LogSink)
        .with(JsonLinesSink::new(std::io::stdout()));
    let stop = AtomicBool::new(false);
    let summary = pipeline.run(&mut source, &mut sink, &stop)?;

    log::info!(
        "demo finished: scene={} frames={} deposits={} history={}",
        args.scene,
        summary.frames_processed,
        summary.deposits,
        pipeline.history().len()
    );
    Ok(())
}
