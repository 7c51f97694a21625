use std::cmp::Ordering;

use anyhow::{anyhow, Result};

use crate::nn::Tensor;

/// One decoded detection row: top-left `x, y`, `w, h` in model pixels, then
/// class id and score.
pub type BoxRow = [f32; 6];

#[derive(Clone, Debug, PartialEq)]
pub enum PostProcessStep {
    FormatYoloV2 {
        /// `[height, width]` of the model input.
        image_size: [u32; 2],
        anchors: Vec<(f32, f32)>,
        boxes_per_cell: usize,
        num_classes: usize,
    },
    ExcludeLowScoreBox {
        threshold: f32,
    },
    Nms {
        iou_threshold: f32,
        max_output_size: usize,
        per_class: bool,
    },
}

/// Post-processed output of one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PostOutput {
    /// Per-class probabilities.
    Scores(Vec<f32>),
    Boxes(Vec<BoxRow>),
}

#[derive(Clone, Debug, Default)]
pub struct PostProcessor {
    steps: Vec<PostProcessStep>,
}

impl PostProcessor {
    pub fn new(steps: Vec<PostProcessStep>) -> Self {
        Self { steps }
    }

    /// Decode raw network output. With no steps the output is taken as a
    /// probability vector.
    pub fn apply(&self, output: Tensor) -> Result<PostOutput> {
        let mut current = PostOutput::Scores(output.data().to_vec());
        for step in &self.steps {
            current = match (step, current) {
                (
                    PostProcessStep::FormatYoloV2 {
                        image_size,
                        anchors,
                        boxes_per_cell,
                        num_classes,
                    },
                    PostOutput::Scores(_),
                ) => PostOutput::Boxes(decode_yolo_v2(
                    &output,
                    *image_size,
                    anchors,
                    *boxes_per_cell,
                    *num_classes,
                )?),
                (PostProcessStep::ExcludeLowScoreBox { threshold }, PostOutput::Boxes(rows)) => {
                    PostOutput::Boxes(rows.into_iter().filter(|r| r[5] >= *threshold).collect())
                }
                (
                    PostProcessStep::Nms {
                        iou_threshold,
                        max_output_size,
                        per_class,
                    },
                    PostOutput::Boxes(rows),
                ) => PostOutput::Boxes(nms(rows, *iou_threshold, *max_output_size, *per_class)),
                (step, _) => {
                    return Err(anyhow!("post-process step {:?} is out of order", step));
                }
            };
        }
        Ok(current)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Decode a `[1, grid_h, grid_w, boxes_per_cell * (num_classes + 5)]` YOLOv2
/// head. Each anchor slot holds class logits, then objectness, then x, y, w, h.
fn decode_yolo_v2(
    output: &Tensor,
    image_size: [u32; 2],
    anchors: &[(f32, f32)],
    boxes_per_cell: usize,
    num_classes: usize,
) -> Result<Vec<BoxRow>> {
    let shape = output.shape();
    let stride = num_classes + 5;
    if shape.len() != 4 || shape[0] != 1 || shape[3] != boxes_per_cell * stride {
        return Err(anyhow!(
            "YOLOv2 output shape {:?} does not match {} boxes of {} classes",
            shape,
            boxes_per_cell,
            num_classes
        ));
    }
    if anchors.len() < boxes_per_cell {
        return Err(anyhow!(
            "{} anchors configured for {} boxes per cell",
            anchors.len(),
            boxes_per_cell
        ));
    }

    let (grid_h, grid_w) = (shape[1], shape[2]);
    let (image_h, image_w) = (image_size[0] as f32, image_size[1] as f32);
    let data = output.data();
    let mut rows = Vec::with_capacity(grid_h * grid_w * boxes_per_cell * num_classes);

    for row in 0..grid_h {
        for col in 0..grid_w {
            for (anchor_idx, &(anchor_w, anchor_h)) in
                anchors.iter().take(boxes_per_cell).enumerate()
            {
                let base = ((row * grid_w + col) * boxes_per_cell + anchor_idx) * stride;
                let cell = &data[base..base + stride];
                let probs = softmax(&cell[..num_classes]);
                let confidence = sigmoid(cell[num_classes]);

                let cx = (sigmoid(cell[num_classes + 1]) + col as f32) / grid_w as f32;
                let cy = (sigmoid(cell[num_classes + 2]) + row as f32) / grid_h as f32;
                let w = cell[num_classes + 3].exp() * anchor_w / grid_w as f32;
                let h = cell[num_classes + 4].exp() * anchor_h / grid_h as f32;

                let x = (cx - w / 2.0) * image_w;
                let y = (cy - h / 2.0) * image_h;
                let (w, h) = (w * image_w, h * image_h);
                for (class_id, prob) in probs.into_iter().enumerate() {
                    rows.push([x, y, w, h, class_id as f32, confidence * prob]);
                }
            }
        }
    }
    Ok(rows)
}

fn iou(a: &BoxRow, b: &BoxRow) -> f32 {
    let left = a[0].max(b[0]);
    let top = a[1].max(b[1]);
    let right = (a[0] + a[2]).min(b[0] + b[2]);
    let bottom = (a[1] + a[3]).min(b[1] + b[3]);
    let inter = (right - left).max(0.0) * (bottom - top).max(0.0);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn greedy_nms(mut rows: Vec<BoxRow>, iou_threshold: f32, max_output_size: usize) -> Vec<BoxRow> {
    rows.sort_by(|a, b| b[5].partial_cmp(&a[5]).unwrap_or(Ordering::Equal));
    let mut kept: Vec<BoxRow> = Vec::new();
    for row in rows {
        if kept.len() >= max_output_size {
            break;
        }
        if kept.iter().all(|k| iou(k, &row) <= iou_threshold) {
            kept.push(row);
        }
    }
    kept
}

fn nms(
    rows: Vec<BoxRow>,
    iou_threshold: f32,
    max_output_size: usize,
    per_class: bool,
) -> Vec<BoxRow> {
    if !per_class {
        return greedy_nms(rows, iou_threshold, max_output_size);
    }
    let mut classes: Vec<f32> = Vec::new();
    for row in &rows {
        if !classes.contains(&row[4]) {
            classes.push(row[4]);
        }
    }
    classes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    classes
        .into_iter()
        .flat_map(|class| {
            let members = rows.iter().filter(|r| r[4] == class).copied().collect();
            greedy_nms(members, iou_threshold, max_output_size)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yolo_step(num_classes: usize) -> PostProcessStep {
        PostProcessStep::FormatYoloV2 {
            image_size: [64, 64],
            anchors: vec![(1.0, 1.0)],
            boxes_per_cell: 1,
            num_classes,
        }
    }

    #[test]
    fn empty_pipeline_yields_scores() -> Result<()> {
        let post = PostProcessor::default();
        let out = post.apply(Tensor::new(vec![1, 3], vec![0.1, 0.7, 0.2])?)?;
        assert_eq!(out, PostOutput::Scores(vec![0.1, 0.7, 0.2]));
        Ok(())
    }

    #[test]
    fn yolo_decodes_cell_geometry() -> Result<()> {
        // 2x2 grid, one class, zero logits everywhere.
        let output = Tensor::zeros(vec![1, 2, 2, 6])?;
        let post = PostProcessor::new(vec![yolo_step(1)]);
        let PostOutput::Boxes(rows) = post.apply(output)? else {
            panic!("expected boxes");
        };
        assert_eq!(rows.len(), 4);
        // Cell (0, 0): centre at 0.25 of 64, anchor width half the image.
        let first = rows[0];
        assert!((first[0] - 0.0).abs() < 1e-4);
        assert!((first[2] - 32.0).abs() < 1e-4);
        assert!((first[5] - 0.5).abs() < 1e-6);
        // Cell (0, 1) is shifted half the image to the right.
        assert!((rows[1][0] - 32.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn yolo_rejects_mismatched_shape() -> Result<()> {
        let post = PostProcessor::new(vec![yolo_step(2)]);
        assert!(post.apply(Tensor::zeros(vec![1, 2, 2, 6])?).is_err());
        Ok(())
    }

    #[test]
    fn exclude_low_score_keeps_threshold_and_above() -> Result<()> {
        let output = Tensor::zeros(vec![1, 1, 1, 7])?;
        let post = PostProcessor::new(vec![
            yolo_step(2),
            PostProcessStep::ExcludeLowScoreBox { threshold: 0.25 },
        ]);
        let PostOutput::Boxes(rows) = post.apply(output)? else {
            panic!("expected boxes");
        };
        // Both classes score 0.5 * 0.5.
        assert_eq!(rows.len(), 2);
        Ok(())
    }

    #[test]
    fn nms_suppresses_overlaps_per_class() {
        let rows = vec![
            [0.0, 0.0, 10.0, 10.0, 0.0, 0.9],
            [1.0, 1.0, 10.0, 10.0, 0.0, 0.8],
            [1.0, 1.0, 10.0, 10.0, 1.0, 0.7],
            [50.0, 50.0, 10.0, 10.0, 0.0, 0.6],
        ];
        let kept = nms(rows.clone(), 0.5, 100, true);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0], rows[0]);
        assert_eq!(kept[1], rows[3]);
        assert_eq!(kept[2], rows[2]);

        let global = nms(rows, 0.5, 1, false);
        assert_eq!(global.len(), 1);
    }

    #[test]
    fn steps_out_of_order_are_rejected() -> Result<()> {
        let post = PostProcessor::new(vec![PostProcessStep::ExcludeLowScoreBox { threshold: 0.1 }]);
        assert!(post.apply(Tensor::zeros(vec![1, 2])?).is_err());
        Ok(())
    }
}
