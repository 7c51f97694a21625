use std::collections::HashMap;

use super::result::{BoundingBox, ClassScore, Detection, UniqueBox};

/// Pick the winning class for one box.
///
/// A candidate replaces the current best only when `score - margin` is
/// strictly greater, so equal scores keep the earlier class.
pub fn decide_class(preds: &[ClassScore], margin: f32) -> (usize, f32) {
    let mut best = (0usize, 0.0f32);
    for pred in preds {
        if pred.score - margin > best.1 {
            best = (pred.class_id, pred.score);
        }
    }
    best
}

/// Merge detections whose boxes match exactly, in first-appearance order.
pub fn gather_unique_boxes(detections: &[Detection], margin: f32) -> Vec<UniqueBox> {
    let mut groups: Vec<(BoundingBox, Vec<ClassScore>)> = Vec::new();
    let mut indices: HashMap<String, usize> = HashMap::new();

    for detection in detections {
        let key = detection.bbox.key();
        match indices.get(&key) {
            Some(&idx) => groups[idx].1.extend_from_slice(&detection.scores),
            None => {
                indices.insert(key, groups.len());
                groups.push((detection.bbox, detection.scores.clone()));
            }
        }
    }

    groups
        .into_iter()
        .map(|(bbox, preds)| {
            let (class_id, score) = decide_class(&preds, margin);
            UniqueBox {
                bbox,
                class_id,
                score,
            }
        })
        .collect()
}
