//! Per-connection frame decisions and decoration.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde_json::Value;

use crate::annotate::{mask_restricted_area, Annotator};
use crate::detect::{
    detections_from_rows, gather_unique_boxes, zone_state, AlertMonitor, AlertState,
    SubmitThrottle, ZoneState,
};
use crate::meta::{ModelMeta, Task};
use crate::output::{FramePrediction, JsonOutput};
use crate::process::PostOutput;

/// Tie margin when picking the class of a merged box.
const CLASS_MARGIN: f32 = 0.0;

/// A decorated frame and, when an alert fired, the result document to publish.
pub struct VisualizedFrame {
    pub image: RgbImage,
    pub alert: Option<Value>,
    pub state: Option<AlertState>,
}

/// Debounce state for one client stream.
pub struct FrameVisualizer {
    trigger_class_id: usize,
    monitor: AlertMonitor,
    throttle: SubmitThrottle,
}

impl FrameVisualizer {
    pub fn new(trigger_class_id: usize, duration: Duration) -> Self {
        Self {
            trigger_class_id,
            monitor: AlertMonitor::new(trigger_class_id, duration),
            throttle: SubmitThrottle::new(duration),
        }
    }

    pub fn render(
        &mut self,
        meta: &ModelMeta,
        annotator: &Annotator,
        mut image: RgbImage,
        output: &PostOutput,
        network_fps: f32,
        now: Instant,
    ) -> Result<VisualizedFrame> {
        let json = JsonOutput::new(meta);
        let (alert, state) = match (meta.task, output) {
            (Task::ObjectDetection, PostOutput::Boxes(rows)) => {
                let (width, height) = image.dimensions();
                let detections = detections_from_rows(rows, width, height, meta.image_size);
                let boxes = gather_unique_boxes(&detections, CLASS_MARGIN);
                let center_x = (width / 2) as f32;
                let zones: Vec<ZoneState> = boxes.iter().map(|b| zone_state(b, center_x)).collect();
                let decision = self.monitor.update(&zones, now);

                mask_restricted_area(&mut image);
                annotator.draw_detections(&mut image, &boxes, &zones, self.trigger_class_id, |id| {
                    meta.class_name(id).to_string()
                });
                if let Some(banner) = decision.banner {
                    annotator.draw_banner(&mut image, banner);
                }

                let alert = decision
                    .newly_raised
                    .then(|| json.render(FramePrediction::ObjectDetection(&detections)));
                (alert, Some(decision.state))
            }
            (Task::Classification, PostOutput::Scores(scores)) => {
                if let Some((class_id, probability)) = top_class(scores) {
                    let name = meta.class_name(class_id);
                    annotator.draw_classification(&mut image, name, probability);
                }
                let alert = self
                    .throttle
                    .ready(now)
                    .then(|| json.render(FramePrediction::Classification(scores)));
                (alert, None)
            }
            (task, _) => {
                return Err(anyhow!("cannot visualize {} output", task));
            }
        };

        annotator.draw_fps(&mut image, network_fps);
        if alert.is_some() {
            log::info!("Detect Warning!!!");
        }
        Ok(VisualizedFrame { image, alert, state })
    }
}

fn top_class(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (id, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((id, score)),
        })
}
