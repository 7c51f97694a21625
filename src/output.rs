//! Inference results as the Blueoil output JSON document.

use serde_json::{json, Value};

use crate::detect::Detection;
use crate::meta::ModelMeta;

pub const OUTPUT_VERSION: f64 = 0.2;

/// What the network produced for one frame.
#[derive(Clone, Copy, Debug)]
pub enum FramePrediction<'a> {
    Classification(&'a [f32]),
    /// Detections already scaled to the frame.
    ObjectDetection(&'a [Detection]),
}

pub struct JsonOutput<'a> {
    meta: &'a ModelMeta,
}

impl<'a> JsonOutput<'a> {
    pub fn new(meta: &'a ModelMeta) -> Self {
        Self { meta }
    }

    fn class(&self, class_id: usize) -> Value {
        json!({"id": class_id, "name": self.meta.class_name(class_id)})
    }

    /// One-frame document; `file_path` is null for camera frames.
    pub fn render(&self, prediction: FramePrediction<'_>) -> Value {
        let prediction = match prediction {
            FramePrediction::Classification(scores) => scores
                .iter()
                .enumerate()
                .map(|(id, p)| json!({"class": self.class(id), "probability": format!("{:.3}", p)}))
                .collect::<Vec<_>>(),
            FramePrediction::ObjectDetection(detections) => detections
                .iter()
                .flat_map(|d| {
                    d.scores.iter().map(move |s| {
                        json!({
                            "box": [d.bbox.x, d.bbox.y, d.bbox.w, d.bbox.h],
                            "class": self.class(s.class_id),
                            "score": format!("{:.3}", s.score),
                        })
                    })
                })
                .collect::<Vec<_>>(),
        };
        let classes: Vec<Value> = (0..self.meta.classes.len()).map(|id| self.class(id)).collect();

        json!({
            "version": OUTPUT_VERSION,
            "date": chrono::Local::now().to_rfc3339(),
            "task": self.meta.task.as_str(),
            "classes": classes,
            "benchmark": {},
            "results": [{"file_path": null, "prediction": prediction}],
        })
    }
}
