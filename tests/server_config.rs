use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use blueoil_deploy::config::ServerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BLUEOIL_SERVER_CONFIG",
        "AWS_GG_RESOURCE_PREFIX",
        "BLUEOIL_MODEL_PATH",
        "BLUEOIL_META_PATH",
        "BLUEOIL_META_PRESET",
        "BLUEOIL_SERVER_ADDR",
        "BOX_SCORE_THRESHOLD",
        "BLUEOIL_CAMERA_DEVICE",
        "BLUEOIL_ALERT_DURATION_SECS",
        "BLUEOIL_TRIGGER_CLASS",
        "BLUEOIL_FONT_PATH",
        "MQTT_BROKER_ADDR",
        "MQTT_CLIENT_ID",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "resource_prefix": "/greengrass/res",
        "addr": "127.0.0.1:9000",
        "score_threshold": 0.3,
        "camera": {"device": "stub://front", "width": 640, "height": 480, "fps": 30},
        "alert": {"duration_secs": 2.0, "trigger_class": "person"},
        "mqtt": {"broker": "mqtt://broker.local:1883", "result_topic": "gateway/result"}
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("BLUEOIL_SERVER_CONFIG", file.path());
    std::env::set_var("BOX_SCORE_THRESHOLD", "0.7");
    std::env::set_var("BLUEOIL_META_PATH", "/tmp/custom/meta.yaml");
    std::env::set_var("MQTT_CLIENT_ID", "gateway-7");

    let cfg = ServerConfig::load().expect("load config");
    clear_env();

    assert_eq!(
        cfg.model_path,
        PathBuf::from("/greengrass/res/blueoil/output/output/models/lib/libdlk_fpga.so")
    );
    assert_eq!(cfg.meta_path, PathBuf::from("/tmp/custom/meta.yaml"));
    assert_eq!(cfg.addr, "127.0.0.1:9000");
    assert_eq!(cfg.score_threshold, 0.7);
    assert_eq!(cfg.camera.device, "stub://front");
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (640, 480, 30));
    assert_eq!(cfg.alert_duration, Duration::from_secs(2));
    assert_eq!(cfg.trigger_class, "person");
    assert_eq!(cfg.publish.broker.as_deref(), Some("mqtt://broker.local:1883"));
    assert_eq!(cfg.publish.client_id, "gateway-7");
    assert_eq!(cfg.publish.result_topic, "gateway/result");
    assert_eq!(cfg.publish.firehose_topic, "kinesisfirehose/message");
}

#[test]
fn resource_prefix_from_env_alone_is_enough() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("AWS_GG_RESOURCE_PREFIX", "/srv/res");
    let cfg = ServerConfig::load().expect("load config");
    clear_env();

    assert_eq!(
        cfg.meta_path,
        PathBuf::from("/srv/res/blueoil/output/output/models/meta.yaml")
    );
    assert_eq!(cfg.addr, "0.0.0.0:8080");
    assert_eq!(cfg.publish.broker, None);
}

#[test]
fn meta_preset_from_env_needs_no_meta_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BLUEOIL_MODEL_PATH", "/models/lib/libdlk_fpga.so");
    std::env::set_var("BLUEOIL_META_PRESET", "cifar10");
    let cfg = ServerConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.meta_preset.as_deref(), Some("cifar10"));
    assert!(cfg.meta_path.as_os_str().is_empty());
}

#[test]
fn rejects_missing_model_and_bad_threshold() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    assert!(ServerConfig::load().is_err());

    std::env::set_var("AWS_GG_RESOURCE_PREFIX", "/srv/res");
    std::env::set_var("BOX_SCORE_THRESHOLD", "1.5");
    let err = ServerConfig::load().unwrap_err();
    clear_env();
    assert!(err.to_string().contains("score threshold"));
}

#[test]
fn rejects_unparseable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("BLUEOIL_SERVER_CONFIG", file.path());
    let err = ServerConfig::load().unwrap_err();
    clear_env();
    assert!(err.to_string().contains("invalid config file"));
}
