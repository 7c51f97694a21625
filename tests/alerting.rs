//! Restricted-area alerting from post-processed rows to debounced banners.

use std::time::{Duration, Instant};

use blueoil_deploy::detect::{
    detections_from_rows, gather_unique_boxes, zone_state, AlertMonitor, AlertState, Banner,
    ZoneState,
};
use blueoil_deploy::output::{FramePrediction, JsonOutput};
use blueoil_deploy::ModelMeta;

const FRAME: (u32, u32) = (320, 240);

fn zones_for(rows: &[[f32; 6]]) -> Vec<ZoneState> {
    let meta = ModelMeta::openimages_face();
    let detections = detections_from_rows(rows, FRAME.0, FRAME.1, meta.image_size);
    let boxes = gather_unique_boxes(&detections, 0.0);
    let center_x = (FRAME.0 / 2) as f32;
    boxes.iter().map(|b| zone_state(b, center_x)).collect()
}

#[test]
fn face_entering_restricted_area_raises_one_warning() {
    let meta = ModelMeta::openimages_face();
    let trigger = meta.trigger_class_id("Humanface");
    let mut monitor = AlertMonitor::new(trigger, Duration::from_secs(1));
    let start = Instant::now();

    // Left half, model space 224 wide.
    let safe = zones_for(&[[20.0, 50.0, 40.0, 40.0, 0.0, 0.9]]);
    let decision = monitor.update(&safe, start);
    assert_eq!(decision.state, AlertState::Normal);
    assert_eq!(decision.banner, None);

    let restricted = zones_for(&[[160.0, 50.0, 40.0, 40.0, 0.0, 0.9]]);
    let mut raised = 0;
    let mut first_banner = None;
    for ms in (100..=2500).step_by(100) {
        let decision = monitor.update(&restricted, start + Duration::from_millis(ms));
        assert_eq!(decision.state, AlertState::Warning);
        if decision.newly_raised {
            raised += 1;
        }
        if decision.banner.is_some() && first_banner.is_none() {
            first_banner = Some(ms);
        }
    }
    assert_eq!(raised, 1);
    assert_eq!(first_banner, Some(1100));
    assert_eq!(monitor.state(), AlertState::Warning);

    // Leaving and re-entering starts a new debounce period.
    let later = start + Duration::from_millis(2600);
    assert_eq!(monitor.update(&safe, later).banner, None);
    let reentered = later + Duration::from_millis(100);
    assert_eq!(monitor.update(&restricted, reentered).banner, None);
    let again = monitor.update(&restricted, reentered + Duration::from_secs(1));
    assert_eq!(again.banner, Some(Banner::Warning));
    assert!(again.newly_raised);
}

#[test]
fn duplicate_rows_collapse_to_one_box() {
    let rows = [
        [160.0, 50.0, 40.0, 40.0, 0.0, 0.4],
        [160.0, 50.0, 40.0, 40.0, 0.0, 0.8],
    ];
    let zones = zones_for(&rows);
    assert_eq!(zones.len(), 1);
    assert!(!zones[0].safe);
}

#[test]
fn warning_document_lists_every_detection() {
    let meta = ModelMeta::openimages_face();
    let rows = [
        [160.0, 50.0, 40.0, 40.0, 0.0, 0.9],
        [20.0, 50.0, 40.0, 40.0, 0.0, 0.6],
    ];
    let detections = detections_from_rows(&rows, FRAME.0, FRAME.1, meta.image_size);
    let doc = JsonOutput::new(&meta).render(FramePrediction::ObjectDetection(&detections));

    assert_eq!(doc["task"], "IMAGE.OBJECT_DETECTION");
    let results = doc["results"].as_array().expect("results array");
    assert_eq!(results.len(), 1);
    let predictions = results[0]["prediction"].as_array().expect("predictions");
    assert_eq!(predictions.len(), 2);
}
