//! Model metadata (`meta.yaml`) written next to a converted model.
//!
//! ```yaml
//! TASK: IMAGE.OBJECT_DETECTION
//! CLASSES: [Humanface]
//! IMAGE_SIZE: [224, 224]
//! DATA_FORMAT: NHWC
//! PRE_PROCESSOR:
//!   - ResizeWithGtBoxes: {size: [224, 224]}
//!   - PerImageStandardization: null
//! POST_PROCESSOR:
//!   - FormatYoloV2: {...}
//!   - ExcludeLowScoreBox: {threshold: 0.05}
//!   - NMS: {iou_threshold: 0.5, max_output_size: 100, per_class: true}
//! ```

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use std::fmt;
use std::path::Path;

use crate::process::{DataFormat, PostProcessStep, PostProcessor, PreProcessStep, PreProcessor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    Classification,
    ObjectDetection,
    SemanticSegmentation,
}

impl Task {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "IMAGE.CLASSIFICATION" => Ok(Self::Classification),
            "IMAGE.OBJECT_DETECTION" => Ok(Self::ObjectDetection),
            "IMAGE.SEMANTIC_SEGMENTATION" => Ok(Self::SemanticSegmentation),
            other => Err(anyhow!("unknown task {}", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "IMAGE.CLASSIFICATION",
            Self::ObjectDetection => "IMAGE.OBJECT_DETECTION",
            Self::SemanticSegmentation => "IMAGE.SEMANTIC_SEGMENTATION",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct MetaFile {
    task: String,
    classes: Vec<String>,
    image_size: [u32; 2],
    data_format: Option<String>,
    pre_processor: Option<Vec<Value>>,
    post_processor: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SizeParams {
    size: [u32; 2],
}

#[derive(Debug, Deserialize)]
struct YoloParams {
    image_size: [u32; 2],
    anchors: Vec<(f32, f32)>,
    boxes_per_cell: Option<usize>,
    num_classes: Option<usize>,
    classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ThresholdParams {
    threshold: f32,
}

#[derive(Debug, Deserialize)]
struct NmsParams {
    iou_threshold: f32,
    max_output_size: usize,
    per_class: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelMeta {
    pub task: Task,
    pub classes: Vec<String>,
    /// `[height, width]` of the network input.
    pub image_size: [u32; 2],
    pub data_format: DataFormat,
    pub pre_processor: Vec<PreProcessStep>,
    pub post_processor: Vec<PostProcessStep>,
}

impl ModelMeta {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read model meta {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("parse model meta {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let file: MetaFile = serde_yaml::from_str(contents)?;
        let task = Task::parse(&file.task)?;
        let data_format = match file.data_format.as_deref() {
            Some(format) => DataFormat::parse(format)?,
            None => DataFormat::default(),
        };
        let pre_processor = file
            .pre_processor
            .unwrap_or_default()
            .iter()
            .map(parse_pre_step)
            .collect::<Result<Vec<_>>>()?;
        let post_processor = file
            .post_processor
            .unwrap_or_default()
            .iter()
            .map(|step| parse_post_step(step, file.classes.len()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            task,
            classes: file.classes,
            image_size: file.image_size,
            data_format,
            pre_processor,
            post_processor,
        })
    }

    /// Replace the threshold of every `ExcludeLowScoreBox` step.
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        for step in &mut self.post_processor {
            if let PostProcessStep::ExcludeLowScoreBox { threshold: current } = step {
                *current = threshold;
            }
        }
        self
    }

    /// Index of the class named `name`, falling back to the first class.
    pub fn trigger_class_id(&self, name: &str) -> usize {
        self.classes.iter().position(|c| c == name).unwrap_or(0)
    }

    pub fn class_name(&self, class_id: usize) -> &str {
        self.classes
            .get(class_id)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Shape of the batch the preprocessor produces.
    pub fn input_shape(&self) -> Vec<usize> {
        let [h, w] = self.image_size;
        let (h, w) = (h as usize, w as usize);
        match self.data_format {
            DataFormat::Nhwc => vec![1, h, w, 3],
            DataFormat::Nchw => vec![1, 3, h, w],
        }
    }

    pub fn pre_processor(&self) -> PreProcessor {
        PreProcessor::new(self.pre_processor.clone(), self.data_format)
    }

    pub fn post_processor(&self) -> PostProcessor {
        PostProcessor::new(self.post_processor.clone())
    }

    /// Built-in metadata for the sample models, selected by name instead of
    /// a `meta.yaml` file.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "cifar10" => Ok(Self::cifar10()),
            "openimages_face" => Ok(Self::openimages_face()),
            other => Err(anyhow!(
                "unknown model preset {:?}; expected cifar10 or openimages_face",
                other
            )),
        }
    }

    /// CIFAR-10 classification sample.
    pub fn cifar10() -> Self {
        let image_size = [32, 32];
        Self {
            task: Task::Classification,
            classes: [
                "airplane",
                "automobile",
                "bird",
                "cat",
                "deer",
                "dog",
                "frog",
                "horse",
                "ship",
                "truck",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            image_size,
            data_format: DataFormat::Nhwc,
            pre_processor: vec![
                PreProcessStep::Resize { size: image_size },
                PreProcessStep::PerImageStandardization,
            ],
            post_processor: Vec::new(),
        }
    }

    /// Open Images face detection sample.
    pub fn openimages_face() -> Self {
        let image_size = [224, 224];
        let anchors = vec![
            (1.3221, 1.73145),
            (3.19275, 4.00944),
            (5.05587, 8.09892),
            (9.47112, 4.84053),
            (11.2364, 10.0071),
        ];
        Self {
            task: Task::ObjectDetection,
            classes: vec!["Humanface".to_string()],
            image_size,
            data_format: DataFormat::Nhwc,
            pre_processor: vec![
                PreProcessStep::Resize { size: image_size },
                PreProcessStep::PerImageStandardization,
            ],
            post_processor: vec![
                PostProcessStep::FormatYoloV2 {
                    image_size,
                    boxes_per_cell: anchors.len(),
                    anchors,
                    num_classes: 1,
                },
                PostProcessStep::ExcludeLowScoreBox { threshold: 0.05 },
                PostProcessStep::Nms {
                    iou_threshold: 0.5,
                    max_output_size: 100,
                    per_class: true,
                },
            ],
        }
    }
}

/// Split a `- Name: params` entry.
fn split_step(value: &Value) -> Result<(&str, &Value)> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| anyhow!("processor entry must be a single-key map"))?;
    let mut entries = mapping.iter();
    match (entries.next(), entries.next()) {
        (Some((name, params)), None) => {
            let name = name
                .as_str()
                .ok_or_else(|| anyhow!("processor name must be a string"))?;
            Ok((name, params))
        }
        _ => Err(anyhow!("processor entry must be a single-key map")),
    }
}

fn params<T: DeserializeOwned>(name: &str, params: &Value) -> Result<T> {
    serde_yaml::from_value(params.clone())
        .with_context(|| format!("invalid parameters for {}", name))
}

fn parse_pre_step(value: &Value) -> Result<PreProcessStep> {
    let (name, raw) = split_step(value)?;
    match name {
        "Resize" | "ResizeWithGtBoxes" => {
            let p: SizeParams = params(name, raw)?;
            Ok(PreProcessStep::Resize { size: p.size })
        }
        "DivideBy255" => Ok(PreProcessStep::DivideBy255),
        "PerImageStandardization" => Ok(PreProcessStep::PerImageStandardization),
        other => Err(anyhow!("unsupported pre-processor {}", other)),
    }
}

fn parse_post_step(value: &Value, class_count: usize) -> Result<PostProcessStep> {
    let (name, raw) = split_step(value)?;
    match name {
        "FormatYoloV2" => {
            let p: YoloParams = params(name, raw)?;
            let num_classes = p
                .num_classes
                .or_else(|| p.classes.as_ref().map(Vec::len))
                .unwrap_or(class_count);
            Ok(PostProcessStep::FormatYoloV2 {
                image_size: p.image_size,
                boxes_per_cell: p.boxes_per_cell.unwrap_or(p.anchors.len()),
                anchors: p.anchors,
                num_classes,
            })
        }
        "ExcludeLowScoreBox" => {
            let p: ThresholdParams = params(name, raw)?;
            Ok(PostProcessStep::ExcludeLowScoreBox {
                threshold: p.threshold,
            })
        }
        "NMS" => {
            let p: NmsParams = params(name, raw)?;
            Ok(PostProcessStep::Nms {
                iou_threshold: p.iou_threshold,
                max_output_size: p.max_output_size,
                per_class: p.per_class.unwrap_or(true),
            })
        }
        other => Err(anyhow!("unsupported post-processor {}", other)),
    }
}
