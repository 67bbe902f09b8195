use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use deposit_kernel::config::DepositdConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DEPOSIT_CONFIG",
        "DEPOSIT_SOURCE_URL",
        "DEPOSIT_MODEL_PATH",
        "DEPOSIT_LABELS_PATH",
        "DEPOSIT_EVENTS_PATH",
        "DEPOSIT_ROI_DIR",
        "DEPOSIT_SETTLE_SECS",
        "DEPOSIT_REQUIRED_FRAMES",
        "DEPOSIT_MOTION_THRESHOLD",
        "DEPOSIT_MIN_CONTOUR_AREA",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DepositdConfig::load().expect("load defaults");
    assert_eq!(cfg.source.url, "stub://deposit");
    assert_eq!(cfg.source.target_fps, 10);
    assert_eq!(cfg.pipeline.motion.threshold, 5.0);
    assert_eq!(cfg.pipeline.min_contour_area, 500.0);
    assert_eq!(cfg.pipeline.settle_duration, Duration::from_secs(1));
    assert_eq!(cfg.pipeline.detection_required_frames, 3);
    assert_eq!(cfg.pipeline.background.history, 500);
    assert_eq!(cfg.pipeline.background.dist2_threshold, 400.0);
    assert_eq!(cfg.classifier.input_size, 384);
    assert!(cfg.classifier.model_path.is_none());
    assert!(cfg.output.events_path.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "url": "/dev/video2", "target_fps": 15, "width": 800, "height": 600 },
        "motion": { "threshold": 3.5, "search_radius": 5 },
        "min_contour_area": 800.0,
        "settle_duration_secs": 1.5,
        "detection_required_frames": 4,
        "background": { "history": 200, "var_threshold": 9.0 },
        "classifier": {
            "model_path": "/opt/models/waste.onnx",
            "categories": ["Recyclable", "Organic", "Non-recyclable"],
            "input_size": 224
        },
        "output": { "events_path": "/var/lib/deposit/events.jsonl", "roi_dir": "/tmp/rois" }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("DEPOSIT_CONFIG", file.path());
    std::env::set_var("DEPOSIT_SETTLE_SECS", "0.5");
    std::env::set_var("DEPOSIT_REQUIRED_FRAMES", "5");
    std::env::set_var("DEPOSIT_SOURCE_URL", "stub://pair");

    let cfg = DepositdConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "stub://pair");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!((cfg.source.width, cfg.source.height), (800, 600));
    assert_eq!(cfg.pipeline.motion.threshold, 3.5);
    assert_eq!(cfg.pipeline.motion.search_radius, 5);
    assert_eq!(cfg.pipeline.motion.block_size, 8);
    assert_eq!(cfg.pipeline.min_contour_area, 800.0);
    assert_eq!(cfg.pipeline.settle_duration, Duration::from_millis(500));
    assert_eq!(cfg.pipeline.detection_required_frames, 5);
    assert_eq!(cfg.pipeline.background.history, 200);
    assert_eq!(cfg.pipeline.background.dist2_threshold, 400.0);
    assert_eq!(cfg.pipeline.background.var_threshold, 9.0);
    assert_eq!(
        cfg.pipeline.roi_dir.as_deref(),
        Some(std::path::Path::new("/tmp/rois"))
    );
    assert_eq!(cfg.classifier.input_size, 224);
    assert_eq!(
        cfg.classifier.categories,
        vec!["Recyclable", "Organic", "Non-recyclable"]
    );
    let labels = cfg.classifier.label_table().expect("labels");
    assert_eq!(labels.resolve(1), Some("Organic"));
    assert_eq!(
        cfg.output.events_path.as_deref(),
        Some(std::path::Path::new("/var/lib/deposit/events.jsonl"))
    );

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        detection_required_frames = 2

        [source]
        url = "file:///srv/captures/bin-3"

        [motion]
        threshold = 2.0
    "#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = DepositdConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.source.url, "file:///srv/captures/bin-3");
    assert_eq!(cfg.pipeline.detection_required_frames, 2);
    assert_eq!(cfg.pipeline.motion.threshold, 2.0);

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DEPOSIT_REQUIRED_FRAMES", "0");
    assert!(DepositdConfig::load().is_err());
    clear_env();

    std::env::set_var("DEPOSIT_SETTLE_SECS", "soon");
    assert!(DepositdConfig::load().is_err());
    clear_env();

    // A model without labels cannot name its predictions.
    std::env::set_var("DEPOSIT_MODEL_PATH", "/opt/models/waste.onnx");
    assert!(DepositdConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    assert!(DepositdConfig::load_from(Some(file.path())).is_err());

    clear_env();
}
