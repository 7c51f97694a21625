use crate::process::BoxRow;

/// Box in frame pixels, top-left origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Exact-coordinate grouping key.
    pub(crate) fn key(&self) -> String {
        format!("{}-{}-{}-{}", self.x, self.y, self.w, self.h)
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.w / 2.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassScore {
    pub class_id: usize,
    pub score: f32,
}

/// A box with the class hypotheses the network produced for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub scores: Vec<ClassScore>,
}

/// A deduplicated box with its winning class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UniqueBox {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub score: f32,
}

/// Scale post-processed rows from model input space to the frame.
///
/// `model_size` is `[height, width]`; every row becomes one single-class
/// detection.
pub fn detections_from_rows(
    rows: &[BoxRow],
    frame_width: u32,
    frame_height: u32,
    model_size: [u32; 2],
) -> Vec<Detection> {
    let height_scale = frame_height as f32 / model_size[0].max(1) as f32;
    let width_scale = frame_width as f32 / model_size[1].max(1) as f32;
    rows.iter()
        .map(|row| Detection {
            bbox: BoundingBox {
                x: row[0] * width_scale,
                y: row[1] * height_scale,
                w: row[2] * width_scale,
                h: row[3] * height_scale,
            },
            scores: vec![ClassScore {
                class_id: row[4].max(0.0) as usize,
                score: row[5],
            }],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_scale_to_frame_size() {
        let rows = [[10.0, 20.0, 30.0, 40.0, 2.0, 0.8]];
        let detections = detections_from_rows(&rows, 320, 240, [120, 160]);
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(
            d.bbox,
            BoundingBox {
                x: 20.0,
                y: 40.0,
                w: 60.0,
                h: 80.0
            }
        );
        assert_eq!(
            d.scores,
            vec![ClassScore {
                class_id: 2,
                score: 0.8
            }]
        );
    }
}
