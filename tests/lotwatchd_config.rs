use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use lotwatch::config::LotwatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LOTWATCH_CONFIG",
        "LOTWATCH_PARKING_SOURCE",
        "LOTWATCH_PLATE_SOURCE",
        "LOTWATCH_SPOT_LAYOUT",
        "LOTWATCH_SAMPLE_INTERVAL",
        "LOTWATCH_REPORT_DIR",
        "LOTWATCH_REPORT_INTERVAL_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let layout_path = file.path().with_extension("layout.json");
    let json = format!(
        r#"{{
            "parking": {{
                "source": {{
                    "location": "stub://parking",
                    "target_fps": 15,
                    "width": 800,
                    "height": 600
                }},
                "layout": "{}",
                "sample_interval": 45,
                "diff_ratio": 0.25,
                "classifier": {{ "name": "cpu", "threshold": 12.5 }}
            }},
            "plates": {{
                "source": {{ "location": "rtsp://gate-camera", "live": true }},
                "vehicle_classes": [2, 7],
                "tracker": {{ "name": "iou", "max_age": 12 }},
                "ocr": {{ "name": "stub" }}
            }},
            "report": {{
                "interval_secs": 60
            }}
        }}"#,
        layout_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("LOTWATCH_CONFIG", file.path());
    std::env::set_var("LOTWATCH_SAMPLE_INTERVAL", "20");
    std::env::set_var("LOTWATCH_REPORT_DIR", "/tmp/lotwatch-reports");

    let cfg = LotwatchConfig::load().expect("load config");

    assert_eq!(cfg.parking.source.location, "stub://parking");
    assert_eq!(cfg.parking.source.target_fps, 15);
    assert_eq!(cfg.parking.source.width, 800);
    assert_eq!(cfg.parking.source.height, 600);
    assert_eq!(cfg.parking.layout.as_deref(), Some(layout_path.as_path()));
    assert_eq!(cfg.parking.sample_interval, 20);
    assert_eq!(cfg.parking.diff_ratio, 0.25);
    assert_eq!(cfg.parking.classifier.name, "cpu");
    assert_eq!(cfg.parking.classifier.options.threshold, Some(12.5));
    assert_eq!(cfg.plates.source.location, "rtsp://gate-camera");
    assert!(cfg.plates.source.live);
    assert_eq!(cfg.plates.vehicle_classes, vec![2, 7]);
    assert_eq!(cfg.plates.detector.name, "color-blob");
    assert_eq!(cfg.plates.tracker.options.max_age, Some(12));
    assert_eq!(
        cfg.report.dir.as_deref(),
        Some(std::path::Path::new("/tmp/lotwatch-reports"))
    );
    assert_eq!(cfg.report.interval, Duration::from_secs(60));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    std::fs::write(
        file.path(),
        r#"
[parking]
sample_interval = 10

[plates.source]
location = "stub://traffic"
width = 320
height = 240
"#,
    )
    .expect("write config");

    let cfg = LotwatchConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.parking.sample_interval, 10);
    assert_eq!(cfg.plates.source.width, 320);
    assert_eq!(cfg.plates.source.height, 240);
    assert_eq!(cfg.parking.source.location, "stub://parking");

    clear_env();
}

#[test]
fn env_overrides_sources_and_layout() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LOTWATCH_PARKING_SOURCE", "/srv/video/lot.mp4");
    std::env::set_var("LOTWATCH_SPOT_LAYOUT", "/srv/video/lot.json");
    std::env::set_var("LOTWATCH_PLATE_SOURCE", "rtsp://entrance");

    let cfg = LotwatchConfig::load().expect("load config");
    assert_eq!(cfg.parking.source.location, "/srv/video/lot.mp4");
    assert_eq!(
        cfg.parking.layout.as_deref(),
        Some(std::path::Path::new("/srv/video/lot.json"))
    );
    assert_eq!(cfg.plates.source.location, "rtsp://entrance");
    assert!(cfg.report.dir.is_none());

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LOTWATCH_SAMPLE_INTERVAL", "0");
    assert!(LotwatchConfig::load().is_err());

    std::env::set_var("LOTWATCH_SAMPLE_INTERVAL", "thirty");
    assert!(LotwatchConfig::load().is_err());
    std::env::remove_var("LOTWATCH_SAMPLE_INTERVAL");

    std::env::set_var("LOTWATCH_REPORT_INTERVAL_SECS", "0");
    assert!(LotwatchConfig::load().is_err());
    std::env::remove_var("LOTWATCH_REPORT_INTERVAL_SECS");

    // A recorded lot has no painted grid to fall back on.
    std::env::set_var("LOTWATCH_PARKING_SOURCE", "/srv/video/lot.mp4");
    assert!(LotwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LOTWATCH_CONFIG", "/nonexistent/lotwatch.json");
    assert!(LotwatchConfig::load().is_err());

    clear_env();
}
